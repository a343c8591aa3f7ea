//! Broker receive loop.
//!
//! One task receives datagrams and spawns a worker for each. At most
//! `max_workers` of them run at once; the rest wait for a permit inside
//! their own task, so the receive loop never blocks on a busy pool and
//! still sees shutdown and the sweep tick. Membership changes take the
//! directory's write lock; handoff
//! relay and name lookups share the read lock. Outbound datagrams are
//! sent while the lock is held, so neighbour updates leave in the order
//! the directory changed.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio::task::JoinSet;

use crate::codec::WireCodec;
use crate::message::Message;
use crate::transport::{send_message, Transport};
use crate::types::now_ms;

use super::state::{BrokerState, Outbound};
use super::{BrokerCommand, BrokerConfig};

/// How long in-flight workers get to finish once the loop stops.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

pub(super) async fn broker_loop<T: Transport>(
    transport: T,
    codec: WireCodec,
    config: BrokerConfig,
    mut cmd_rx: mpsc::Receiver<BrokerCommand>,
) {
    let transport = Arc::new(transport);
    let codec = Arc::new(codec);
    let state = Arc::new(RwLock::new(BrokerState::new(config.lease_time)));
    let workers = Arc::new(Semaphore::new(config.max_workers));
    let mut tasks = JoinSet::new();

    let mut sweep = tokio::time::interval(config.sweep_interval);
    // Skip the immediate first tick
    sweep.tick().await;

    loop {
        tokio::select! {
            // ── 1. Incoming datagrams ───────────────────────────
            result = transport.recv_raw() => {
                let (sender, data) = match result {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("broker receive failed, stopping: {e}");
                        break;
                    }
                };
                let message = match codec.decode(&data) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("dropping malformed datagram from {sender}: {e}");
                        continue;
                    }
                };
                if message == Message::PoisonPill {
                    tracing::info!("poison pill from {sender}, shutting down");
                    break;
                }

                let (transport, codec, state) = (transport.clone(), codec.clone(), state.clone());
                let workers = workers.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    handle_message(sender, message, &state, &*transport, &codec).await;
                });
            }

            // ── 2. Commands ─────────────────────────────────────
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    BrokerCommand::Members { reply } => {
                        let _ = reply.send(state.read().await.members());
                    }
                    BrokerCommand::Shutdown => {
                        tracing::info!("broker shutdown requested");
                        break;
                    }
                }
            }

            // ── 3. Lease sweep ──────────────────────────────────
            _ = sweep.tick() => {
                let (transport, codec, state) = (transport.clone(), codec.clone(), state.clone());
                let workers = workers.clone();
                tasks.spawn(async move {
                    let Ok(_permit) = workers.acquire_owned().await else {
                        return;
                    };
                    let mut guard = state.write().await;
                    let out = guard.sweep(now_ms());
                    send_all(out, &*transport, &codec).await;
                });
            }

            // ── 4. Reap finished workers ────────────────────────
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    tracing::warn!("broker worker failed: {e}");
                }
            }
        }
    }

    // Let in-flight handlers finish, then abort stragglers.
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("broker worker failed: {e}");
            }
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("aborting {} broker workers still running", tasks.len());
        tasks.shutdown().await;
    }
    tracing::info!("broker stopped");
}

async fn handle_message<T: Transport>(
    sender: SocketAddr,
    message: Message,
    state: &RwLock<BrokerState>,
    transport: &T,
    codec: &WireCodec,
) {
    match message {
        Message::RegisterRequest => {
            let mut guard = state.write().await;
            let out = guard.handle_register(sender, now_ms());
            send_all(out, transport, codec).await;
        }
        Message::DeregisterRequest { id } => {
            let mut guard = state.write().await;
            let out = guard.handle_deregister(&id);
            send_all(out, transport, codec).await;
        }
        Message::HandoffRequest { fish } => {
            let guard = state.read().await;
            let out = guard.handle_handoff(sender, fish);
            send_all(out, transport, codec).await;
        }
        Message::NameResolutionRequest {
            tank_id,
            request_id,
        } => {
            let guard = state.read().await;
            let out = guard.handle_name_resolution(sender, &tank_id, request_id);
            send_all(out, transport, codec).await;
        }
        other => {
            tracing::warn!("broker ignoring unexpected {} from {sender}", other.kind());
        }
    }
}

async fn send_all<T: Transport + ?Sized>(out: Vec<Outbound>, transport: &T, codec: &WireCodec) {
    for Outbound { to, message } in out {
        send_message(transport, codec, to, &message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Broker;
    use crate::transport::mock::MockTransport;
    use crate::types::PeerId;
    use aqua_transport::{AquaTransportError, MemoryEndpoint, MemoryNetwork};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn register_sends_through_transport() {
        let transport = MockTransport::new(addr(4711));
        let state = RwLock::new(BrokerState::new(Duration::from_secs(3)));
        handle_message(addr(1), Message::RegisterRequest, &state, &transport, &WireCodec::plain())
            .await;

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 6);
        assert!(sent.iter().all(|(to, _)| *to == addr(1)));
        assert_eq!(sent[5].1, Message::Token);
        assert_eq!(state.read().await.directory().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_message_is_ignored() {
        let transport = MockTransport::new(addr(4711));
        let state = RwLock::new(BrokerState::new(Duration::from_secs(3)));
        handle_message(addr(1), Message::SnapshotMarker, &state, &transport, &WireCodec::plain())
            .await;
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn deregister_via_worker() {
        let transport = MockTransport::new(addr(4711));
        let state = RwLock::new(BrokerState::new(Duration::from_secs(3)));
        let codec = WireCodec::plain();
        for p in 1..=2 {
            handle_message(addr(p), Message::RegisterRequest, &state, &transport, &codec).await;
        }
        let before = transport.sent().len();
        handle_message(
            addr(2),
            Message::DeregisterRequest {
                id: PeerId::from_counter(2),
            },
            &state,
            &transport,
            &codec,
        )
        .await;
        let after = transport.sent_messages();
        // Lone survivor is pointed at itself on both sides.
        assert_eq!(after.len() - before, 2);
        assert!(after[before..].iter().all(|(to, _)| *to == addr(1)));
    }

    /// Receives normally; every send hangs.
    struct StalledSends(MemoryEndpoint);

    #[async_trait::async_trait]
    impl Transport for StalledSends {
        fn local_addr(&self) -> SocketAddr {
            Transport::local_addr(&self.0)
        }

        async fn send_raw(&self, _to: SocketAddr, _data: &[u8]) -> Result<(), AquaTransportError> {
            std::future::pending().await
        }

        async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
            Transport::recv_raw(&self.0).await
        }

        fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
            Transport::try_recv_raw(&self.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_seen_while_every_worker_is_stuck() {
        let net = MemoryNetwork::new();
        let config = BrokerConfig {
            max_workers: 1,
            ..BrokerConfig::default()
        };
        let broker = Broker::spawn(StalledSends(net.bind_any()), config).unwrap();
        let peer = net.bind_any();
        let codec = WireCodec::plain();

        // The first registration holds the only worker forever.
        for _ in 0..3 {
            send_message(&peer, &codec, broker.local_addr(), &Message::RegisterRequest).await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), broker.shutdown()).await;
        assert!(stopped.is_ok(), "receive loop blocked behind busy workers");
    }
}
