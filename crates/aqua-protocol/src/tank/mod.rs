/// Tank runtime — one ring member as a single-task actor.
///
/// The runtime owns a transport and all tank state (neighbours, fish,
/// token, snapshot round, location hints). It exposes a channel-based
/// API so the application never touches datagrams.
mod effect;
mod executor;
mod r#loop;
mod snapshot;
mod state;

pub use effect::TankEffect;
pub use snapshot::{CompletionCallback, Edge, Snapshot, SnapshotAction, SnapshotPhase};
pub use state::{ResolveCallback, TankState};

use std::net::SocketAddr;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::codec::WireCodec;
use crate::fish::Fish;
use crate::transport::Transport;
use crate::types::{Direction, PeerId, DEFAULT_BROKER_PORT, DEFAULT_TOKEN_HOLD_MS};
use crate::AquaProtocolError;

/// Environment variable overriding the default broker address.
pub const BROKER_ADDR_ENV: &str = "AQUA_BROKER_ADDR";

// ── Configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TankConfig {
    pub broker_addr: SocketAddr,
    /// How long the token is held before it moves left.
    pub token_hold: Duration,
    /// Simulation tick.
    pub tick_interval: Duration,
    /// Move fish on every tick. Off in tests that need fixed counts.
    pub motion: bool,
    pub width: i32,
    pub height: i32,
    /// Distance a fish moves per tick.
    pub fish_step: i32,
    pub max_fish: usize,
    /// Spawn one fish on first registration.
    pub spawn_initial_fish: bool,
    /// Relay handoffs through the broker instead of sending them directly.
    pub handoff_via_broker: bool,
    /// Re-register at half the lease time.
    pub renew_lease: bool,
    /// How long a name lookup waits for the broker. Misses are never answered.
    pub lookup_timeout: Duration,
    /// Ring-wide channel secret; `None` for plain datagrams.
    pub secret: Option<String>,
    /// Seed for fish placement; random when `None`.
    pub rng_seed: Option<u64>,
}

impl Default for TankConfig {
    fn default() -> Self {
        let broker_addr = std::env::var(BROKER_ADDR_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_BROKER_PORT)));
        Self {
            broker_addr,
            token_hold: Duration::from_millis(DEFAULT_TOKEN_HOLD_MS),
            tick_interval: Duration::from_millis(10),
            motion: true,
            width: 600,
            height: 350,
            fish_step: 2,
            max_fish: 5,
            spawn_initial_fish: true,
            handoff_via_broker: true,
            renew_lease: true,
            lookup_timeout: Duration::from_secs(5),
            secret: None,
            rng_seed: None,
        }
    }
}

impl TankConfig {
    pub fn new(broker_addr: SocketAddr) -> Self {
        Self {
            broker_addr,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), AquaProtocolError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(AquaProtocolError::Config(format!(
                "tank dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.fish_step <= 0 {
            return Err(AquaProtocolError::Config("fish step must be positive".into()));
        }
        if self.tick_interval.is_zero() {
            return Err(AquaProtocolError::Config("tick interval must be positive".into()));
        }
        if self.lookup_timeout.is_zero() {
            return Err(AquaProtocolError::Config("lookup timeout must be positive".into()));
        }
        Ok(())
    }
}

// ── Commands (app → runtime) ──────────────────────────────────────────

pub enum TankCommand {
    InitiateSnapshot {
        reply: oneshot::Sender<Result<u64, AquaProtocolError>>,
    },
    /// Toggle a fish wherever it is, following location hints.
    Locate { fish_id: String },
    /// Ask the fish's home tank directly.
    LocateViaHome { fish_id: String },
    ResolveName {
        tank_id: PeerId,
        reply: oneshot::Sender<Result<SocketAddr, AquaProtocolError>>,
    },
    SpawnFish,
    GetStatus { reply: oneshot::Sender<TankStatus> },
    /// Release the token, deregister, then stop.
    Shutdown { done: oneshot::Sender<()> },
}

// ── Events (runtime → app) ───────────────────────────────────────────

/// Presentation-level notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TankEvent {
    Registered {
        id: PeerId,
        lease_time_ms: u64,
        renewed: bool,
    },
    NeighbourChanged {
        side: Direction,
        address: SocketAddr,
    },
    TokenAcquired,
    TokenReleased {
        to: SocketAddr,
    },
    FishSpawned {
        fish_id: String,
    },
    FishDeparted {
        fish_id: String,
        direction: Direction,
    },
    FishArrived {
        fish_id: String,
        from: SocketAddr,
    },
    FishReversed {
        fish_id: String,
    },
    FishToggled {
        fish_id: String,
        toggled: bool,
    },
    LocationForwarded {
        fish_id: String,
        to: SocketAddr,
    },
    SnapshotStarted {
        count: u64,
        initiator: bool,
    },
    SnapshotClosed {
        count: u64,
    },
    SnapshotCompleted {
        total: u64,
    },
    /// An unfinished round was dropped here.
    SnapshotAbandoned,
    NameResolved {
        request_id: String,
        address: SocketAddr,
    },
    /// Non-fatal problem.
    Error {
        description: String,
    },
    /// The runtime stopped because of an unrecoverable error.
    Fatal {
        description: String,
    },
}

/// Point-in-time view of a tank.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankStatus {
    pub id: Option<PeerId>,
    pub local_addr: SocketAddr,
    pub left: Option<SocketAddr>,
    pub right: Option<SocketAddr>,
    pub has_token: bool,
    pub fish: Vec<Fish>,
    pub snapshot_phase: SnapshotPhase,
}

// ── TankHandle (app-facing API) ──────────────────────────────────────

/// Handle to a running tank. Cheap to clone.
#[derive(Clone)]
pub struct TankHandle {
    cmd_tx: mpsc::Sender<TankCommand>,
    local_addr: SocketAddr,
}

impl TankHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, cmd: TankCommand) -> Result<(), AquaProtocolError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| AquaProtocolError::RuntimeShutDown)
    }

    /// Run a snapshot round from this tank and wait for the ring-wide total.
    ///
    /// A round still open from an earlier call is abandoned, and that call
    /// fails with `SnapshotAbandoned`.
    pub async fn initiate_snapshot(&self) -> Result<u64, AquaProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.send(TankCommand::InitiateSnapshot { reply: tx }).await?;
        rx.await.map_err(|_| AquaProtocolError::RuntimeShutDown)?
    }

    pub async fn locate(&self, fish_id: impl Into<String>) -> Result<(), AquaProtocolError> {
        self.send(TankCommand::Locate {
            fish_id: fish_id.into(),
        })
        .await
    }

    pub async fn locate_via_home(
        &self,
        fish_id: impl Into<String>,
    ) -> Result<(), AquaProtocolError> {
        self.send(TankCommand::LocateViaHome {
            fish_id: fish_id.into(),
        })
        .await
    }

    /// Resolve a tank id through the broker. The broker never answers
    /// unknown ids; those fail with `LookupTimedOut` after
    /// `TankConfig::lookup_timeout`.
    pub async fn resolve_name(&self, tank_id: PeerId) -> Result<SocketAddr, AquaProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.send(TankCommand::ResolveName { tank_id, reply: tx })
            .await?;
        rx.await.map_err(|_| AquaProtocolError::RuntimeShutDown)?
    }

    pub async fn spawn_fish(&self) -> Result<(), AquaProtocolError> {
        self.send(TankCommand::SpawnFish).await
    }

    pub async fn status(&self) -> Result<TankStatus, AquaProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.send(TankCommand::GetStatus { reply: tx }).await?;
        rx.await.map_err(|_| AquaProtocolError::RuntimeShutDown)
    }

    /// Leave the ring. Returns once the goodbye datagrams are sent.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(TankCommand::Shutdown { done: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

// ── TankChannels ─────────────────────────────────────────────────────

/// Channels returned to the application when the tank starts.
pub struct TankChannels {
    pub handle: TankHandle,
    pub events: mpsc::Receiver<TankEvent>,
}

// ── TankRuntime ──────────────────────────────────────────────────────

pub struct TankRuntime;

impl TankRuntime {
    /// Start a tank on `transport` and register with the broker.
    ///
    /// Spawns the event loop as a tokio task.
    pub fn spawn<T: Transport>(
        transport: T,
        config: TankConfig,
    ) -> Result<TankChannels, AquaProtocolError> {
        config.validate()?;
        let codec = WireCodec::from_secret(config.secret.as_deref())?;
        let local_addr = transport.local_addr();

        let (cmd_tx, cmd_rx) = mpsc::channel::<TankCommand>(64);
        let (event_tx, event_rx) = mpsc::channel::<TankEvent>(1024);

        let state = TankState::new(local_addr, config.clone());
        tokio::spawn(r#loop::tank_loop(
            transport, codec, config, state, cmd_rx, event_tx,
        ));

        Ok(TankChannels {
            handle: TankHandle { cmd_tx, local_addr },
            events: event_rx,
        })
    }
}
