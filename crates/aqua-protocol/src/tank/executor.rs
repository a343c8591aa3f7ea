//! Effect executor — the only place the tank touches I/O.
//!
//! - Send -> codec + transport
//! - ArmTokenTimer / ScheduleRenewal / ExpireLookup -> spawned sleeps feeding the loop
//! - Emit -> event channel

use tokio::sync::mpsc;

use crate::codec::WireCodec;
use crate::transport::{send_message, Transport};

use super::effect::TankEffect;
use super::TankEvent;

/// Timer expirations fed back into the tank loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum TimerFired {
    TokenHold { epoch: u64 },
    RenewLease,
    LookupExpired { request_id: String },
}

pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<TankEffect>,
    transport: &T,
    codec: &WireCodec,
    event_tx: &mpsc::Sender<TankEvent>,
    timer_tx: &mpsc::UnboundedSender<TimerFired>,
) {
    for effect in effects {
        match effect {
            TankEffect::Send { to, message } => {
                send_message(transport, codec, to, &message).await;
            }
            TankEffect::ArmTokenTimer { epoch, after } => {
                schedule(timer_tx, after, TimerFired::TokenHold { epoch });
            }
            TankEffect::ScheduleRenewal { after } => {
                schedule(timer_tx, after, TimerFired::RenewLease);
            }
            TankEffect::ExpireLookup { request_id, after } => {
                schedule(timer_tx, after, TimerFired::LookupExpired { request_id });
            }
            TankEffect::Emit(event) => {
                // try_send: never block the runtime on a slow consumer
                if event_tx.try_send(event).is_err() {
                    tracing::trace!("tank event dropped, channel full or closed");
                }
            }
        }
    }
}

fn schedule(
    timer_tx: &mpsc::UnboundedSender<TimerFired>,
    after: std::time::Duration,
    fired: TimerFired,
) {
    let timer_tx = timer_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = timer_tx.send(fired);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::transport::mock::MockTransport;
    use std::net::SocketAddr;
    use std::time::Duration;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn sends_and_emits() {
        let transport = MockTransport::new(addr(1));
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (timer_tx, _timer_rx) = mpsc::unbounded_channel();

        execute_effects(
            vec![
                TankEffect::Send {
                    to: addr(2),
                    message: Message::Token,
                },
                TankEffect::Emit(TankEvent::TokenReleased { to: addr(2) }),
            ],
            &transport,
            &WireCodec::plain(),
            &event_tx,
            &timer_tx,
        )
        .await;

        assert_eq!(transport.sent_messages(), vec![(addr(2), Message::Token)]);
        assert_eq!(
            event_rx.try_recv().unwrap(),
            TankEvent::TokenReleased { to: addr(2) }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_after_delay() {
        let transport = MockTransport::new(addr(1));
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

        execute_effects(
            vec![
                TankEffect::ArmTokenTimer {
                    epoch: 4,
                    after: Duration::from_millis(3_000),
                },
                TankEffect::ScheduleRenewal {
                    after: Duration::from_millis(1_500),
                },
                TankEffect::ExpireLookup {
                    request_id: "r1".into(),
                    after: Duration::from_millis(5_000),
                },
            ],
            &transport,
            &WireCodec::plain(),
            &event_tx,
            &timer_tx,
        )
        .await;

        assert!(timer_rx.try_recv().is_err());
        assert_eq!(timer_rx.recv().await, Some(TimerFired::RenewLease));
        assert_eq!(
            timer_rx.recv().await,
            Some(TimerFired::TokenHold { epoch: 4 })
        );
        assert_eq!(
            timer_rx.recv().await,
            Some(TimerFired::LookupExpired {
                request_id: "r1".into()
            })
        );
    }

    #[tokio::test]
    async fn full_event_channel_does_not_block() {
        let transport = MockTransport::new(addr(1));
        let (event_tx, _event_rx) = mpsc::channel(1);
        let (timer_tx, _timer_rx) = mpsc::unbounded_channel();
        let effects = vec![TankEffect::Emit(TankEvent::TokenAcquired); 3];
        execute_effects(effects, &transport, &WireCodec::plain(), &event_tx, &timer_tx).await;
    }
}
