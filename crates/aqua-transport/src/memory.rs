//! In-process datagram network.
//!
//! Endpoints bound on a [`MemoryNetwork`] exchange messages through
//! unbounded channels keyed by socket address. Used by tests and local
//! simulations that want the real broker and tank loops without sockets.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::AquaTransportError;

/// A received datagram: sender address and payload.
pub type Datagram = (SocketAddr, Vec<u8>);

/// First port handed out by [`MemoryNetwork::bind_any`].
const FIRST_EPHEMERAL_PORT: u16 = 20_000;

#[derive(Debug)]
struct NetworkInner {
    inboxes: HashMap<SocketAddr, mpsc::UnboundedSender<Datagram>>,
    next_port: u16,
}

/// A shared in-memory network. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetworkInner {
                inboxes: HashMap::new(),
                next_port: FIRST_EPHEMERAL_PORT,
            })),
        }
    }

    /// Bind an endpoint on a specific address.
    pub fn bind(&self, addr: SocketAddr) -> Result<MemoryEndpoint, AquaTransportError> {
        let mut inner = self.lock();
        if inner.inboxes.contains_key(&addr) {
            return Err(AquaTransportError::AddressInUse(addr));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.inboxes.insert(addr, tx);
        Ok(MemoryEndpoint {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        })
    }

    /// Bind an endpoint on the next free loopback port.
    pub fn bind_any(&self) -> MemoryEndpoint {
        let mut inner = self.lock();
        let addr = loop {
            let candidate = SocketAddr::from(([127, 0, 0, 1], inner.next_port));
            inner.next_port = inner.next_port.wrapping_add(1).max(FIRST_EPHEMERAL_PORT);
            if !inner.inboxes.contains_key(&candidate) {
                break candidate;
            }
        };
        let (tx, rx) = mpsc::unbounded_channel();
        inner.inboxes.insert(addr, tx);
        drop(inner);

        MemoryEndpoint {
            addr,
            network: self.clone(),
            inbox: tokio::sync::Mutex::new(rx),
        }
    }

    /// Detach an address: later sends to it fail with `Unreachable`.
    pub fn disconnect(&self, addr: &SocketAddr) {
        self.lock().inboxes.remove(addr);
    }

    /// Addresses currently bound.
    pub fn endpoints(&self) -> Vec<SocketAddr> {
        self.lock().inboxes.keys().copied().collect()
    }

    fn deliver(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        let inner = self.lock();
        let inbox = inner
            .inboxes
            .get(&to)
            .ok_or(AquaTransportError::Unreachable(to))?;
        inbox
            .send((from, data.to_vec()))
            .map_err(|_| AquaTransportError::Unreachable(to))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkInner> {
        // A poisoned map is still structurally valid.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One endpoint on a [`MemoryNetwork`].
#[derive(Debug)]
pub struct MemoryEndpoint {
    addr: SocketAddr,
    network: MemoryNetwork,
    inbox: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn send_raw(&self, to: SocketAddr, data: &[u8]) -> Result<(), AquaTransportError> {
        self.network.deliver(self.addr, to, data)
    }

    pub async fn recv_raw(&self) -> Result<Datagram, AquaTransportError> {
        self.inbox
            .lock()
            .await
            .recv()
            .await
            .ok_or(AquaTransportError::Shutdown)
    }

    /// Non-blocking receive. Returns `None` when the inbox is empty or a
    /// concurrent `recv_raw` currently owns it.
    pub fn try_recv_raw(&self) -> Result<Option<Datagram>, AquaTransportError> {
        let Ok(mut inbox) = self.inbox.try_lock() else {
            return Ok(None);
        };
        match inbox.try_recv() {
            Ok(datagram) => Ok(Some(datagram)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(AquaTransportError::Shutdown),
        }
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.network.disconnect(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoints_exchange_datagrams() {
        let net = MemoryNetwork::new();
        let a = net.bind_any();
        let b = net.bind_any();
        assert_ne!(a.local_addr(), b.local_addr());

        a.send_raw(b.local_addr(), b"fish").await.unwrap();
        let (from, data) = b.recv_raw().await.unwrap();
        assert_eq!(from, a.local_addr());
        assert_eq!(data, b"fish");
    }

    #[tokio::test]
    async fn send_to_unbound_address_is_unreachable() {
        let net = MemoryNetwork::new();
        let a = net.bind_any();
        let nowhere: SocketAddr = "127.0.0.1:1".parse().unwrap();

        let err = a.send_raw(nowhere, b"x").await.unwrap_err();
        assert!(matches!(err, AquaTransportError::Unreachable(addr) if addr == nowhere));
    }

    #[test]
    fn binding_twice_fails() {
        let net = MemoryNetwork::new();
        let addr: SocketAddr = "127.0.0.1:4711".parse().unwrap();
        let _first = net.bind(addr).unwrap();
        assert!(matches!(
            net.bind(addr),
            Err(AquaTransportError::AddressInUse(_))
        ));
    }

    #[tokio::test]
    async fn dropped_endpoint_frees_its_address() {
        let net = MemoryNetwork::new();
        let a = net.bind_any();
        let b = net.bind_any();
        let b_addr = b.local_addr();
        drop(b);

        assert!(!net.endpoints().contains(&b_addr));
        assert!(a.send_raw(b_addr, b"late").await.is_err());
        assert!(net.bind(b_addr).is_ok());
    }

    #[tokio::test]
    async fn try_recv_drains_without_waiting() {
        let net = MemoryNetwork::new();
        let a = net.bind_any();
        let b = net.bind_any();

        assert!(b.try_recv_raw().unwrap().is_none());
        a.send_raw(b.local_addr(), b"1").await.unwrap();
        a.send_raw(b.local_addr(), b"2").await.unwrap();

        assert_eq!(b.try_recv_raw().unwrap().unwrap().1, b"1");
        assert_eq!(b.try_recv_raw().unwrap().unwrap().1, b"2");
        assert!(b.try_recv_raw().unwrap().is_none());
    }
}
