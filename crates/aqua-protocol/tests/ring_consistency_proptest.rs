use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use proptest::prelude::*;
use aqua_protocol::{BrokerState, Direction, Message, PeerId};

#[derive(Debug, Clone)]
enum Op {
    Register(u16),
    Deregister(u16),
    Expire(u64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..8u16).prop_map(Op::Register),
        2 => (1..8u16).prop_map(Op::Deregister),
        1 => (0..20_000u64).prop_map(Op::Expire),
    ]
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// What each tank believes its neighbours are, built only from the
/// NeighbourUpdates the broker sent.
#[derive(Default)]
struct Views(HashMap<SocketAddr, (Option<SocketAddr>, Option<SocketAddr>)>);

impl Views {
    fn apply(&mut self, out: Vec<aqua_protocol::Outbound>) {
        for o in out {
            if let Message::NeighbourUpdate { side, address } = o.message {
                let view = self.0.entry(o.to).or_default();
                match side {
                    Direction::Left => view.0 = Some(address),
                    Direction::Right => view.1 = Some(address),
                }
            }
        }
    }
}

proptest! {
    /// After any sequence of joins, leaves and lease expiries, every
    /// member's view matches the directory and the ring closes.
    #[test]
    fn neighbour_views_match_directory(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut broker = BrokerState::new(Duration::from_millis(3_000));
        let mut views = Views::default();
        let mut now = 0u64;

        for op in ops {
            now += 500;
            let out = match op {
                Op::Register(port) => broker.handle_register(addr(port), now),
                Op::Deregister(port) => {
                    let id = broker
                        .directory()
                        .iter()
                        .find(|r| r.address == addr(port))
                        .map(|r| r.id.clone())
                        .unwrap_or_else(|| PeerId::new("client-missing"));
                    broker.handle_deregister(&id)
                }
                Op::Expire(ms) => broker.sweep(now + ms),
            };
            views.apply(out);

            let dir = broker.directory();
            let n = dir.len();
            for (i, record) in dir.iter().enumerate() {
                let left = dir.get((i + n - 1) % n).map(|r| r.address);
                let right = dir.get((i + 1) % n).map(|r| r.address);
                let view = views.0.get(&record.address).copied().unwrap_or_default();
                prop_assert_eq!(view, (left, right), "view of {} diverged", record.id);
            }

            // Walking right from any member visits everyone once.
            if let Some(start) = dir.get(0).map(|r| r.address) {
                let mut seen = vec![start];
                let mut at = start;
                for _ in 0..n {
                    at = views.0[&at].1.unwrap();
                    if at == start {
                        break;
                    }
                    seen.push(at);
                }
                prop_assert_eq!(at, start);
                prop_assert_eq!(seen.len(), n);
            }
        }
    }

    /// Ids are unique, stable across renewals and never reused.
    #[test]
    fn ids_are_stable_and_unique(ports in prop::collection::vec(1..6u16, 1..40)) {
        let mut broker = BrokerState::new(Duration::from_millis(3_000));
        let mut assigned: HashMap<SocketAddr, PeerId> = HashMap::new();
        for port in ports {
            broker.handle_register(addr(port), 0);
            let record = broker
                .directory()
                .iter()
                .find(|r| r.address == addr(port))
                .cloned()
                .unwrap();
            let id = assigned.entry(addr(port)).or_insert_with(|| record.id.clone());
            prop_assert_eq!(&record.id, id);
        }
        let mut ids: Vec<_> = broker.directory().iter().map(|r| r.id.clone()).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        prop_assert_eq!(ids.len(), before);
    }
}
