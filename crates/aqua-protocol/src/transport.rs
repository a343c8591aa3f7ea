use std::net::SocketAddr;
use std::sync::Arc;

use aqua_transport::{AquaNode, AquaTransportError, MemoryEndpoint};

use crate::codec::WireCodec;
use crate::message::Message;

/// Network abstraction used by the broker and tank runtimes.
///
/// Production: [`AquaNode`] (UDP). Tests: [`MemoryEndpoint`] or the
/// recording `MockTransport`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> SocketAddr;

    async fn send_raw(&self, target: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError>;

    /// Wait for the next datagram.
    async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError>;

    /// Return a pending datagram, if any, without waiting.
    fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError>;
}

#[async_trait::async_trait]
impl Transport for AquaNode {
    fn local_addr(&self) -> SocketAddr {
        AquaNode::local_addr(self)
    }

    async fn send_raw(&self, target: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        AquaNode::send_raw(self, target, data).await
    }

    async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
        AquaNode::recv_raw(self).await
    }

    fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
        AquaNode::try_recv_raw(self)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryEndpoint {
    fn local_addr(&self) -> SocketAddr {
        MemoryEndpoint::local_addr(self)
    }

    async fn send_raw(&self, target: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        MemoryEndpoint::send_raw(self, target, data).await
    }

    async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
        MemoryEndpoint::recv_raw(self).await
    }

    fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
        MemoryEndpoint::try_recv_raw(self)
    }
}

#[async_trait::async_trait]
impl<T: Transport> Transport for Arc<T> {
    fn local_addr(&self) -> SocketAddr {
        (**self).local_addr()
    }

    async fn send_raw(&self, target: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        (**self).send_raw(target, data).await
    }

    async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
        (**self).recv_raw().await
    }

    fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
        (**self).try_recv_raw()
    }
}

/// Encode and send one message. Failures are logged, never returned:
/// delivery is best-effort everywhere in the ring.
pub async fn send_message<T: Transport + ?Sized>(
    transport: &T,
    codec: &WireCodec,
    to: SocketAddr,
    message: &Message,
) {
    let bytes = match codec.encode(message) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!("failed to encode {}: {e}", message.kind());
            return;
        }
    };
    match transport.send_raw(to, &bytes).await {
        Ok(()) => tracing::trace!("sent {} to {to}", message.kind()),
        Err(e) => tracing::warn!("send {} to {to} failed: {e}", message.kind()),
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Records sends; never receives anything.
    #[derive(Clone)]
    pub struct MockTransport {
        addr: SocketAddr,
        sent: Arc<Mutex<Vec<(SocketAddr, Vec<u8>)>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new(addr: SocketAddr) -> Self {
            Self {
                addr,
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_sends: Arc::new(Mutex::new(false)),
            }
        }

        pub fn sent(&self) -> Vec<(SocketAddr, Vec<u8>)> {
            self.sent.lock().unwrap().clone()
        }

        /// Sent datagrams decoded with a plain codec.
        pub fn sent_messages(&self) -> Vec<(SocketAddr, Message)> {
            self.sent()
                .into_iter()
                .map(|(to, bytes)| (to, Message::from_bytes(&bytes).unwrap()))
                .collect()
        }

        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        fn local_addr(&self) -> SocketAddr {
            self.addr
        }

        async fn send_raw(
            &self,
            target: SocketAddr,
            data: &[u8],
        ) -> Result<(), AquaTransportError> {
            if *self.fail_sends.lock().unwrap() {
                return Err(AquaTransportError::Unreachable(target));
            }
            self.sent.lock().unwrap().push((target, data.to_vec()));
            Ok(())
        }

        async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
            std::future::pending().await
        }

        fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
            Ok(None)
        }
    }
}
