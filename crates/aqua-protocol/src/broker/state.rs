//! Broker state machine.
//!
//! Pure: every handler takes the current time as input and returns the
//! datagrams to send. The loop owns locking and I/O.

use std::net::SocketAddr;
use std::time::Duration;

use crate::directory::{Neighbours, PeerRecord, RingDirectory};
use crate::fish::Fish;
use crate::message::Message;
use crate::types::{Direction, PeerId};

/// A datagram the broker wants sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: SocketAddr,
    pub message: Message,
}

impl Outbound {
    fn new(to: SocketAddr, message: Message) -> Self {
        Self { to, message }
    }
}

fn neighbour_update(to: SocketAddr, side: Direction, address: SocketAddr) -> Outbound {
    Outbound::new(to, Message::NeighbourUpdate { side, address })
}

#[derive(Debug)]
pub struct BrokerState {
    directory: RingDirectory,
    lease_time: Duration,
}

impl BrokerState {
    pub fn new(lease_time: Duration) -> Self {
        Self {
            directory: RingDirectory::new(),
            lease_time,
        }
    }

    pub fn directory(&self) -> &RingDirectory {
        &self.directory
    }

    pub fn members(&self) -> Vec<PeerRecord> {
        self.directory.iter().cloned().collect()
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    /// Register or renew the tank at `sender`.
    ///
    /// Emission order: the peer's LEFT then RIGHT update, the new left
    /// neighbour's RIGHT update, the new right neighbour's LEFT update,
    /// the response, and finally the token when the ring was just founded.
    /// A renewal that moves the peer first closes the gap it leaves.
    pub fn handle_register(&mut self, sender: SocketAddr, now_ms: u64) -> Vec<Outbound> {
        let lease_ms = self.lease_time.as_millis() as u64;
        let registration = self.directory.register(sender, now_ms + lease_ms);
        let mut out = Vec::new();

        let Ok(current) = self.directory.neighbours_of(&registration.id) else {
            return out;
        };

        if let Some(previous) = registration.previous {
            if previous != current {
                out.extend(bypass(&previous));
            }
        }

        out.push(neighbour_update(sender, Direction::Left, current.left));
        out.push(neighbour_update(sender, Direction::Right, current.right));
        out.push(neighbour_update(current.left, Direction::Right, sender));
        out.push(neighbour_update(current.right, Direction::Left, sender));
        out.push(Outbound::new(
            sender,
            Message::RegisterResponse {
                id: registration.id.clone(),
                lease_time_ms: lease_ms,
            },
        ));

        if !registration.renewed && self.directory.len() == 1 {
            tracing::info!("ring founded by {}, granting token", registration.id);
            out.push(Outbound::new(sender, Message::Token));
        }

        if registration.renewed {
            tracing::debug!("renewed lease of {} at {sender}", registration.id);
        } else {
            tracing::info!(
                "registered {} at {sender} (ring size {})",
                registration.id,
                self.directory.len()
            );
        }
        out
    }

    /// Remove `id` and stitch its former neighbours together.
    pub fn handle_deregister(&mut self, id: &PeerId) -> Vec<Outbound> {
        let removal = match self.directory.remove(id) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("deregister ignored: {e}");
                return Vec::new();
            }
        };
        tracing::info!(
            "deregistered {} at {} (ring size {})",
            id,
            removal.record.address,
            self.directory.len()
        );
        match removal.neighbours {
            Some(n) => bypass(&n),
            None => Vec::new(),
        }
    }

    /// Relay a fish to the sender's neighbour in the fish's direction.
    pub fn handle_handoff(&self, sender: SocketAddr, fish: Fish) -> Vec<Outbound> {
        let neighbours = match self.directory.neighbours_of_address(&sender) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("handoff of {} dropped: {e}", fish.id);
                return Vec::new();
            }
        };
        let target = match fish.direction {
            Direction::Left => neighbours.left,
            Direction::Right => neighbours.right,
        };
        tracing::debug!("relaying {} from {sender} to {target}", fish.id);
        vec![Outbound::new(target, Message::HandoffRequest { fish })]
    }

    /// Answer a name lookup. Unknown names get no reply.
    pub fn handle_name_resolution(
        &self,
        sender: SocketAddr,
        tank_id: &PeerId,
        request_id: String,
    ) -> Vec<Outbound> {
        match self.directory.resolve(tank_id) {
            Some(address) => vec![Outbound::new(
                sender,
                Message::NameResolutionResponse {
                    address,
                    request_id,
                },
            )],
            None => {
                tracing::warn!("name resolution for unknown tank {tank_id} from {sender}");
                Vec::new()
            }
        }
    }

    /// Deregister every peer whose lease expired before `now_ms`.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<Outbound> {
        let expired = self.directory.expired(now_ms);
        let mut out = Vec::new();
        for id in expired {
            tracing::info!("lease of {id} expired");
            out.extend(self.handle_deregister(&id));
        }
        out
    }
}

/// Point each neighbour at the other, skipping the gap between them.
fn bypass(n: &Neighbours) -> Vec<Outbound> {
    vec![
        neighbour_update(n.left, Direction::Right, n.right),
        neighbour_update(n.right, Direction::Left, n.left),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn state() -> BrokerState {
        BrokerState::new(Duration::from_millis(3_000))
    }

    fn nu(to: u16, side: Direction, address: u16) -> Outbound {
        neighbour_update(addr(to), side, addr(address))
    }

    fn response(to: u16, id: u64) -> Outbound {
        Outbound::new(
            addr(to),
            Message::RegisterResponse {
                id: PeerId::from_counter(id),
                lease_time_ms: 3_000,
            },
        )
    }

    #[test]
    fn first_registration_founds_ring_with_token() {
        let mut broker = state();
        let out = broker.handle_register(addr(1), 0);
        assert_eq!(
            out,
            vec![
                nu(1, Direction::Left, 1),
                nu(1, Direction::Right, 1),
                nu(1, Direction::Right, 1),
                nu(1, Direction::Left, 1),
                response(1, 1),
                Outbound::new(addr(1), Message::Token),
            ]
        );
    }

    #[test]
    fn third_registration_emits_in_order() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        broker.handle_register(addr(2), 0);
        let out = broker.handle_register(addr(3), 0);
        assert_eq!(
            out,
            vec![
                nu(3, Direction::Left, 2),
                nu(3, Direction::Right, 1),
                nu(2, Direction::Right, 3),
                nu(1, Direction::Left, 3),
                response(3, 3),
            ]
        );
    }

    #[test]
    fn renewal_of_lone_peer_does_not_mint_token() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        let out = broker.handle_register(addr(1), 1_000);
        assert!(!out.iter().any(|o| o.message == Message::Token));
        assert_eq!(out.last(), Some(&response(1, 1)));
        assert_eq!(broker.directory().get(0).map(|r| r.lease_expiry), Some(4_000));
    }

    #[test]
    fn renewal_that_moves_peer_bypasses_old_slot() {
        let mut broker = state();
        for p in 1..=4 {
            broker.handle_register(addr(p), 0);
        }
        // Ring 1 2 3 4 → 1 3 4 2
        let out = broker.handle_register(addr(2), 0);
        assert_eq!(
            out,
            vec![
                nu(1, Direction::Right, 3),
                nu(3, Direction::Left, 1),
                nu(2, Direction::Left, 4),
                nu(2, Direction::Right, 1),
                nu(4, Direction::Right, 2),
                nu(1, Direction::Left, 2),
                response(2, 2),
            ]
        );
    }

    #[test]
    fn renewal_of_tail_sends_no_bypass() {
        let mut broker = state();
        for p in 1..=3 {
            broker.handle_register(addr(p), 0);
        }
        let out = broker.handle_register(addr(3), 0);
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn deregister_stitches_neighbours() {
        let mut broker = state();
        for p in 1..=3 {
            broker.handle_register(addr(p), 0);
        }
        let out = broker.handle_deregister(&PeerId::from_counter(2));
        assert_eq!(
            out,
            vec![nu(1, Direction::Right, 3), nu(3, Direction::Left, 1)]
        );
        assert_eq!(broker.directory().len(), 2);
    }

    #[test]
    fn deregister_last_peer_sends_nothing() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        assert!(broker.handle_deregister(&PeerId::from_counter(1)).is_empty());
        assert!(broker.directory().is_empty());
    }

    #[test]
    fn deregister_unknown_is_ignored() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        assert!(broker.handle_deregister(&PeerId::from_counter(5)).is_empty());
        assert_eq!(broker.directory().len(), 1);
    }

    #[test]
    fn handoff_follows_fish_direction() {
        let mut broker = state();
        for p in 1..=3 {
            broker.handle_register(addr(p), 0);
        }
        let left = Fish::new("fish1@client2", 0, 0, Direction::Left);
        let out = broker.handle_handoff(addr(2), left.clone());
        assert_eq!(
            out,
            vec![Outbound::new(addr(1), Message::HandoffRequest { fish: left })]
        );

        let right = Fish::new("fish1@client2", 0, 0, Direction::Right);
        let out = broker.handle_handoff(addr(2), right.clone());
        assert_eq!(
            out,
            vec![Outbound::new(addr(3), Message::HandoffRequest { fish: right })]
        );
    }

    #[test]
    fn handoff_from_stranger_is_dropped() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        let fish = Fish::new("fish1@client9", 0, 0, Direction::Left);
        assert!(broker.handle_handoff(addr(9), fish).is_empty());
    }

    #[test]
    fn name_resolution_hit_and_miss() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        broker.handle_register(addr(2), 0);
        let out = broker.handle_name_resolution(addr(1), &PeerId::from_counter(2), "r1".into());
        assert_eq!(
            out,
            vec![Outbound::new(
                addr(1),
                Message::NameResolutionResponse {
                    address: addr(2),
                    request_id: "r1".into()
                }
            )]
        );
        assert!(broker
            .handle_name_resolution(addr(1), &PeerId::from_counter(7), "r2".into())
            .is_empty());
    }

    #[test]
    fn sweep_removes_expired_and_stitches() {
        let mut broker = state();
        broker.handle_register(addr(1), 0);
        broker.handle_register(addr(2), 10_000);
        broker.handle_register(addr(3), 10_000);
        // client1 expires at 3_000, the others at 13_000.
        let out = broker.sweep(5_000);
        assert_eq!(
            out,
            vec![nu(3, Direction::Right, 2), nu(2, Direction::Left, 3)]
        );
        assert_eq!(broker.directory().len(), 2);
        assert!(broker.sweep(13_000).is_empty());
        // client2 leaves client3 alone, then client3 goes too.
        assert_eq!(
            broker.sweep(13_001),
            vec![nu(3, Direction::Right, 3), nu(3, Direction::Left, 3)]
        );
        assert!(broker.directory().is_empty());
    }
}
