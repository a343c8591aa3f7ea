/// The tank event loop.
///
/// A single task owns `TankState` and multiplexes over the transport,
/// application commands, timer expirations and the simulation tick.
/// Every event is handled to completion before the next one.
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::codec::WireCodec;
use crate::transport::Transport;

use super::executor::{execute_effects, TimerFired};
use super::state::TankState;
use super::{TankCommand, TankConfig, TankEvent};

pub(super) async fn tank_loop<T: Transport>(
    transport: T,
    codec: WireCodec,
    config: TankConfig,
    mut state: TankState,
    mut cmd_rx: mpsc::Receiver<TankCommand>,
    event_tx: mpsc::Sender<TankEvent>,
) {
    let (timer_tx, mut timer_rx) = mpsc::unbounded_channel::<TimerFired>();

    let mut tick = tokio::time::interval(config.tick_interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the immediate first tick
    tick.tick().await;

    execute_effects(state.start(), &transport, &codec, &event_tx, &timer_tx).await;
    tracing::info!("tank started on {}", state.local_addr());

    loop {
        let effects = tokio::select! {
            // ── 1. Incoming datagrams ───────────────────────────
            result = transport.recv_raw() => {
                let (sender, data) = match result {
                    Ok(d) => d,
                    Err(e) => {
                        fatal(&event_tx, format!("receive failed: {e}"));
                        break;
                    }
                };
                match codec.decode(&data) {
                    Ok(message) => state.handle_message(sender, message),
                    Err(e) => {
                        fatal(&event_tx, format!("undecodable datagram from {sender}: {e}"));
                        break;
                    }
                }
            }

            // ── 2. Commands from the application ────────────────
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    TankCommand::InitiateSnapshot { reply } => {
                        state.initiate_snapshot(Box::new(move |result| {
                            let _ = reply.send(result);
                        }))
                    }
                    TankCommand::Locate { fish_id } => state.locate(&fish_id),
                    TankCommand::LocateViaHome { fish_id } => state.locate_via_home(&fish_id),
                    TankCommand::ResolveName { tank_id, reply } => {
                        let (_request_id, effects) = state.resolve_name(
                            tank_id,
                            Box::new(move |result| {
                                let _ = reply.send(result);
                            }),
                        );
                        effects
                    }
                    TankCommand::SpawnFish => state.spawn_fish(),
                    TankCommand::GetStatus { reply } => {
                        let _ = reply.send(state.status());
                        Vec::new()
                    }
                    TankCommand::Shutdown { done } => {
                        let effects = state.shutdown();
                        execute_effects(effects, &transport, &codec, &event_tx, &timer_tx).await;
                        let _ = done.send(());
                        break;
                    }
                }
            }

            // ── 3. Timers ───────────────────────────────────────
            Some(fired) = timer_rx.recv() => {
                match fired {
                    TimerFired::TokenHold { epoch } => state.on_token_timeout(epoch),
                    TimerFired::RenewLease => state.on_renew_lease(),
                    TimerFired::LookupExpired { request_id } => state.expire_lookup(&request_id),
                }
            }

            // ── 4. Simulation tick ──────────────────────────────
            _ = tick.tick(), if config.motion => state.tick(),
        };

        execute_effects(effects, &transport, &codec, &event_tx, &timer_tx).await;
    }

    tracing::info!("tank on {} stopped", state.local_addr());
}

fn fatal(event_tx: &mpsc::Sender<TankEvent>, description: String) {
    tracing::error!("tank stopping: {description}");
    let _ = event_tx.try_send(TankEvent::Fatal { description });
}
