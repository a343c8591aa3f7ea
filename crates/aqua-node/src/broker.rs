use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aqua_protocol::{Broker, BrokerConfig};
use aqua_transport::{AquaNode, EndpointConfig};

use crate::common::setup_ctrlc;
use crate::events::{emit, EventStarted};

pub struct BrokerArgs {
    pub bind: SocketAddr,
    pub lease_ms: u64,
    pub workers: usize,
    pub secret: Option<String>,
}

pub async fn run(args: BrokerArgs) -> anyhow::Result<()> {
    let node = AquaNode::bind(EndpointConfig::new().bind_addr(args.bind)).await?;
    let local = node.local_addr();

    let config = BrokerConfig {
        max_workers: args.workers,
        secret: args.secret,
        ..BrokerConfig::with_lease_time(Duration::from_millis(args.lease_ms))
    };
    let handle = Broker::spawn(node, config)?;

    emit(&EventStarted::new("broker", &local.to_string()));
    eprintln!("Broker listening on {local}");
    eprintln!("Press Ctrl+C to stop.\n");

    let running = setup_ctrlc();
    while running.load(Ordering::Relaxed) && !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    if handle.is_finished() {
        eprintln!("Broker stopped (poison pill).");
        handle.wait().await;
    } else {
        handle.shutdown().await;
        eprintln!("Broker stopped.");
    }
    Ok(())
}
