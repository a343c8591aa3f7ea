//! Aqua ring transport layer.
//!
//! Best-effort datagram delivery between tanks and the broker, behind a
//! small stable API: `send_raw`, `recv_raw` (waits) and `try_recv_raw`
//! (returns immediately).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use aqua_transport::{AquaNode, EndpointConfig};
//!
//! # async fn example() -> Result<(), aqua_transport::AquaTransportError> {
//! let node = AquaNode::bind(EndpointConfig::new()).await?;
//! println!("listening on {}", node.local_addr());
//!
//! node.send_raw("127.0.0.1:4711".parse().unwrap(), b"hello").await?;
//! let (from, bytes) = node.recv_raw().await?;
//! println!("{} bytes from {from}", bytes.len());
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
pub mod memory;
mod node;

pub use config::{EndpointConfig, MAX_UDP_PAYLOAD};
pub use error::AquaTransportError;
pub use memory::{Datagram, MemoryEndpoint, MemoryNetwork};
pub use node::AquaNode;
