use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use aqua_protocol::TankConfig;

/// Setup Ctrl+C handler, returns a flag that goes false on signal.
pub fn setup_ctrlc() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        eprintln!("\nCtrl+C received, shutting down...");
        r.store(false, Ordering::Relaxed);
    });
    running
}

/// Explicit address, else `$AQUA_BROKER_ADDR`, else the well-known port.
pub fn broker_addr(explicit: Option<SocketAddr>) -> SocketAddr {
    explicit.unwrap_or_else(|| TankConfig::default().broker_addr)
}
