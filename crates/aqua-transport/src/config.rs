use std::net::SocketAddr;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Configuration for an [`AquaNode`](crate::AquaNode).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use aqua_transport::EndpointConfig;
///
/// let config = EndpointConfig::new()
///     .bind_addr("127.0.0.1:4711".parse().unwrap())
///     .max_datagram_size(8 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Local address to bind. Port 0 picks an ephemeral port.
    pub(crate) bind_addr: SocketAddr,
    /// Maximum datagram size in bytes, both directions.
    pub(crate) max_datagram_size: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointConfig {
    /// Create a new config with defaults.
    ///
    /// If the `AQUA_BIND_ADDR` environment variable holds a valid socket
    /// address it is used as the bind address. This can be overridden with
    /// [`.bind_addr()`](Self::bind_addr).
    pub fn new() -> Self {
        let bind_addr = std::env::var("AQUA_BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 0)));

        Self {
            bind_addr,
            max_datagram_size: MAX_UDP_PAYLOAD,
        }
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the maximum datagram size (default and upper bound: 65507 bytes).
    pub fn max_datagram_size(mut self, bytes: usize) -> Self {
        self.max_datagram_size = bytes.min(MAX_UDP_PAYLOAD);
        self
    }

    /// The configured bind address.
    pub fn addr(&self) -> SocketAddr {
        self.bind_addr
    }
}
