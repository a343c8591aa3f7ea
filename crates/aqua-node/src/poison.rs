use std::net::SocketAddr;

use aqua_protocol::{Message, WireCodec};
use aqua_transport::{AquaNode, EndpointConfig};

use crate::common::broker_addr;

pub async fn run(broker: Option<SocketAddr>, secret: Option<String>) -> anyhow::Result<()> {
    let target = broker_addr(broker);
    let node = AquaNode::bind(EndpointConfig::new()).await?;
    let codec = WireCodec::from_secret(secret.as_deref())?;

    node.send_raw(target, &codec.encode(&Message::PoisonPill)?).await?;
    eprintln!("Poison pill sent to {target}");
    Ok(())
}
