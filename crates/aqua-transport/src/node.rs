use crate::config::EndpointConfig;
use crate::AquaTransportError;

use std::io::ErrorKind;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// An Aqua transport endpoint — a bound UDP socket.
///
/// Every message is one datagram. Delivery is best effort: no
/// acknowledgement, no ordering across senders, no retry.
#[derive(Debug)]
pub struct AquaNode {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_datagram_size: usize,
}

impl AquaNode {
    /// Bind a new endpoint on the configured address.
    pub async fn bind(config: EndpointConfig) -> Result<Self, AquaTransportError> {
        let socket = UdpSocket::bind(config.bind_addr)
            .await
            .map_err(|source| AquaTransportError::Bind {
                addr: config.bind_addr,
                source,
            })?;
        let local_addr = socket
            .local_addr()
            .map_err(|source| AquaTransportError::Bind {
                addr: config.bind_addr,
                source,
            })?;

        tracing::debug!("endpoint bound on {local_addr}");

        Ok(Self {
            socket,
            local_addr,
            max_datagram_size: config.max_datagram_size,
        })
    }

    /// The address peers use to reach this endpoint.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send raw bytes to `to` as a single datagram.
    pub async fn send_raw(&self, to: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        if data.len() > self.max_datagram_size {
            return Err(AquaTransportError::MessageTooLarge {
                size: data.len(),
                max: self.max_datagram_size,
            });
        }
        self.socket
            .send_to(data, to)
            .await
            .map_err(|source| AquaTransportError::Send { addr: to, source })?;
        Ok(())
    }

    /// Receive the next datagram. Waits until one arrives.
    pub async fn recv_raw(&self) -> Result<(SocketAddr, Vec<u8>), AquaTransportError> {
        let mut buf = vec![0u8; self.max_datagram_size];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(AquaTransportError::Receive)?;
        buf.truncate(len);
        Ok((from, buf))
    }

    /// Receive a datagram if one is already queued, without waiting.
    pub fn try_recv_raw(&self) -> Result<Option<(SocketAddr, Vec<u8>)>, AquaTransportError> {
        let mut buf = vec![0u8; self.max_datagram_size];
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, from)) => {
                buf.truncate(len);
                Ok(Some((from, buf)))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(AquaTransportError::Receive(e)),
        }
    }
}
