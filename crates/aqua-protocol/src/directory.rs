//! The broker's ordered ring of registered tanks.
//!
//! Ring order is list order: the left neighbour of the entry at index `i`
//! is the entry at `(i - 1) mod n`, its right neighbour the one at
//! `(i + 1) mod n`. New and renewing peers are appended at the tail.

use std::net::SocketAddr;

use crate::types::PeerId;
use crate::AquaProtocolError;

/// A registered tank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub id: PeerId,
    pub address: SocketAddr,
    /// Unix milliseconds after which the lease is expired.
    pub lease_expiry: u64,
}

/// Addresses on either side of a ring member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Neighbours {
    pub left: SocketAddr,
    pub right: SocketAddr,
}

/// Outcome of [`RingDirectory::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: PeerId,
    /// The address was already registered and kept its id.
    pub renewed: bool,
    /// Neighbours before a renewal moved the peer, if it had any others.
    pub previous: Option<Neighbours>,
}

/// Outcome of [`RingDirectory::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub record: PeerRecord,
    /// Neighbours at removal time; `None` when the peer was alone.
    pub neighbours: Option<Neighbours>,
}

#[derive(Debug, Default)]
pub struct RingDirectory {
    records: Vec<PeerRecord>,
    counter: u64,
}

impl RingDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or renew `address`, placing it at the tail.
    ///
    /// A known address keeps its id; an unknown one gets the next
    /// `client<N>` id. The counter never goes backwards.
    pub fn register(&mut self, address: SocketAddr, lease_expiry: u64) -> Registration {
        let (id, renewed, previous) = match self.index_of_address(&address) {
            Some(index) => {
                let previous = if self.records.len() > 1 {
                    self.neighbours_at(index)
                } else {
                    None
                };
                let record = self.records.remove(index);
                (record.id, true, previous)
            }
            None => {
                self.counter += 1;
                (PeerId::from_counter(self.counter), false, None)
            }
        };

        self.records.push(PeerRecord {
            id: id.clone(),
            address,
            lease_expiry,
        });

        Registration {
            id,
            renewed,
            previous,
        }
    }

    /// Remove a peer by id.
    pub fn remove(&mut self, id: &PeerId) -> Result<Removal, AquaProtocolError> {
        let index = self
            .index_of_id(id)
            .ok_or_else(|| AquaProtocolError::UnknownPeer { id: id.to_string() })?;
        let neighbours = if self.records.len() > 1 {
            self.neighbours_at(index)
        } else {
            None
        };
        let record = self.records.remove(index);
        Ok(Removal { record, neighbours })
    }

    /// Neighbours of the entry at `index`. A lone entry is its own neighbour.
    pub fn neighbours_at(&self, index: usize) -> Option<Neighbours> {
        let n = self.records.len();
        if index >= n {
            return None;
        }
        let left = &self.records[(index + n - 1) % n];
        let right = &self.records[(index + 1) % n];
        Some(Neighbours {
            left: left.address,
            right: right.address,
        })
    }

    pub fn neighbours_of(&self, id: &PeerId) -> Result<Neighbours, AquaProtocolError> {
        self.index_of_id(id)
            .and_then(|index| self.neighbours_at(index))
            .ok_or_else(|| AquaProtocolError::UnknownPeer { id: id.to_string() })
    }

    pub fn neighbours_of_address(
        &self,
        address: &SocketAddr,
    ) -> Result<Neighbours, AquaProtocolError> {
        self.index_of_address(address)
            .and_then(|index| self.neighbours_at(index))
            .ok_or(AquaProtocolError::UnknownAddress { address: *address })
    }

    /// Address registered under `id`.
    pub fn resolve(&self, id: &PeerId) -> Option<SocketAddr> {
        self.records
            .iter()
            .find(|r| &r.id == id)
            .map(|r| r.address)
    }

    pub fn index_of_id(&self, id: &PeerId) -> Option<usize> {
        self.records.iter().position(|r| &r.id == id)
    }

    pub fn index_of_address(&self, address: &SocketAddr) -> Option<usize> {
        self.records.iter().position(|r| &r.address == address)
    }

    /// Ids whose lease expired strictly before `now_ms`.
    pub fn expired(&self, now_ms: u64) -> Vec<PeerId> {
        self.records
            .iter()
            .filter(|r| r.lease_expiry < now_ms)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn get(&self, index: usize) -> Option<&PeerRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PeerRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn ring(ports: &[u16]) -> RingDirectory {
        let mut dir = RingDirectory::new();
        for &p in ports {
            dir.register(addr(p), 1_000);
        }
        dir
    }

    #[test]
    fn register_assigns_sequential_ids() {
        let mut dir = RingDirectory::new();
        let a = dir.register(addr(1), 0);
        let b = dir.register(addr(2), 0);
        assert_eq!(a.id.as_str(), "client1");
        assert_eq!(b.id.as_str(), "client2");
        assert!(!a.renewed && !b.renewed);
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn renewal_keeps_id_and_moves_to_tail() {
        let mut dir = ring(&[1, 2, 3]);
        let reg = dir.register(addr(1), 9_000);
        assert_eq!(reg.id.as_str(), "client1");
        assert!(reg.renewed);
        assert_eq!(
            reg.previous,
            Some(Neighbours {
                left: addr(3),
                right: addr(2)
            })
        );
        let order: Vec<_> = dir.iter().map(|r| r.address.port()).collect();
        assert_eq!(order, vec![2, 3, 1]);
        assert_eq!(dir.get(2).map(|r| r.lease_expiry), Some(9_000));
    }

    #[test]
    fn counter_never_reuses_ids() {
        let mut dir = ring(&[1, 2]);
        dir.remove(&PeerId::from_counter(2)).unwrap();
        let reg = dir.register(addr(3), 0);
        assert_eq!(reg.id.as_str(), "client3");
    }

    #[test]
    fn lone_peer_is_its_own_neighbour() {
        let dir = ring(&[7]);
        let n = dir.neighbours_at(0).unwrap();
        assert_eq!(n.left, addr(7));
        assert_eq!(n.right, addr(7));
    }

    #[test]
    fn neighbours_wrap_around() {
        let dir = ring(&[1, 2, 3]);
        let first = dir.neighbours_of(&PeerId::from_counter(1)).unwrap();
        assert_eq!(first.left, addr(3));
        assert_eq!(first.right, addr(2));
        let last = dir.neighbours_of_address(&addr(3)).unwrap();
        assert_eq!(last.left, addr(2));
        assert_eq!(last.right, addr(1));
    }

    #[test]
    fn remove_reports_former_neighbours() {
        let mut dir = ring(&[1, 2, 3]);
        let removal = dir.remove(&PeerId::from_counter(2)).unwrap();
        assert_eq!(removal.record.address, addr(2));
        assert_eq!(
            removal.neighbours,
            Some(Neighbours {
                left: addr(1),
                right: addr(3)
            })
        );
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn remove_last_peer_has_no_neighbours() {
        let mut dir = ring(&[1]);
        let removal = dir.remove(&PeerId::from_counter(1)).unwrap();
        assert_eq!(removal.neighbours, None);
        assert!(dir.is_empty());
    }

    #[test]
    fn remove_unknown_is_not_found() {
        let mut dir = ring(&[1]);
        let err = dir.remove(&PeerId::from_counter(9)).unwrap_err();
        assert!(matches!(err, AquaProtocolError::UnknownPeer { .. }));
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn resolve_by_id() {
        let dir = ring(&[10, 11]);
        assert_eq!(dir.resolve(&PeerId::from_counter(2)), Some(addr(11)));
        assert_eq!(dir.resolve(&PeerId::from_counter(3)), None);
    }

    #[test]
    fn expired_is_strict() {
        let mut dir = RingDirectory::new();
        dir.register(addr(1), 100);
        dir.register(addr(2), 200);
        assert!(dir.expired(100).is_empty());
        assert_eq!(dir.expired(101), vec![PeerId::from_counter(1)]);
        assert_eq!(dir.expired(500).len(), 2);
    }

    #[test]
    fn out_of_range_index_has_no_neighbours() {
        assert_eq!(RingDirectory::new().neighbours_at(0), None);
        assert_eq!(ring(&[1]).neighbours_at(1), None);
    }
}
