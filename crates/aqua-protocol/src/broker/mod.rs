/// Broker — ring membership, neighbour notification, relay and naming.
///
/// The broker owns the [`RingDirectory`](crate::directory::RingDirectory)
/// behind a read/write lock and serves each datagram on a bounded worker
/// pool. A `PoisonPill` datagram or [`BrokerHandle::shutdown`] stops it.
mod r#loop;
mod state;

pub use state::{BrokerState, Outbound};

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::WireCodec;
use crate::directory::PeerRecord;
use crate::transport::Transport;
use crate::types::DEFAULT_LEASE_TIME_MS;
use crate::AquaProtocolError;

// ── Configuration ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Lease granted on every registration.
    pub lease_time: Duration,
    /// How often expired leases are swept.
    pub sweep_interval: Duration,
    /// Maximum datagrams handled concurrently.
    pub max_workers: usize,
    /// Ring-wide channel secret; `None` for plain datagrams.
    pub secret: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::with_lease_time(Duration::from_millis(DEFAULT_LEASE_TIME_MS))
    }
}

impl BrokerConfig {
    /// Config with the given lease, swept every two lease periods.
    pub fn with_lease_time(lease_time: Duration) -> Self {
        Self {
            lease_time,
            sweep_interval: lease_time * 2,
            max_workers: 8,
            secret: None,
        }
    }

    pub fn validate(&self) -> Result<(), AquaProtocolError> {
        if self.lease_time.is_zero() {
            return Err(AquaProtocolError::Config("lease time must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(AquaProtocolError::Config("sweep interval must be positive".into()));
        }
        if self.max_workers == 0 {
            return Err(AquaProtocolError::Config("broker needs at least one worker".into()));
        }
        Ok(())
    }
}

// ── Commands ──────────────────────────────────────────────────────────

pub(crate) enum BrokerCommand {
    Members { reply: oneshot::Sender<Vec<PeerRecord>> },
    Shutdown,
}

// ── BrokerHandle ─────────────────────────────────────────────────────

/// Handle to a running broker.
pub struct BrokerHandle {
    cmd_tx: mpsc::Sender<BrokerCommand>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl BrokerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current ring, in ring order.
    pub async fn members(&self) -> Result<Vec<PeerRecord>, AquaProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(BrokerCommand::Members { reply: tx })
            .await
            .map_err(|_| AquaProtocolError::RuntimeShutDown)?;
        rx.await.map_err(|_| AquaProtocolError::RuntimeShutDown)
    }

    /// Stop receiving, finish in-flight handlers, and wait for the loop.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(BrokerCommand::Shutdown).await;
        let _ = self.task.await;
    }

    /// Wait until the broker stops on its own (poison pill or transport failure).
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ── Broker ───────────────────────────────────────────────────────────

pub struct Broker;

impl Broker {
    /// Start the broker on `transport`. Spawns the receive loop as a tokio task.
    pub fn spawn<T: Transport>(
        transport: T,
        config: BrokerConfig,
    ) -> Result<BrokerHandle, AquaProtocolError> {
        config.validate()?;
        let codec = WireCodec::from_secret(config.secret.as_deref())?;
        let local_addr = transport.local_addr();
        let (cmd_tx, cmd_rx) = mpsc::channel::<BrokerCommand>(16);

        tracing::info!(
            "broker listening on {local_addr} (lease {:?}, {} workers, sealed: {})",
            config.lease_time,
            config.max_workers,
            codec.is_sealed()
        );

        let task = tokio::spawn(r#loop::broker_loop(transport, codec, config, cmd_rx));

        Ok(BrokerHandle {
            cmd_tx,
            local_addr,
            task,
        })
    }
}
