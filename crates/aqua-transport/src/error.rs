use std::net::SocketAddr;

/// Errors returned by the Aqua transport layer.
#[derive(Debug, thiserror::Error)]
pub enum AquaTransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("send to {addr} failed: {source}")]
    Send {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("no endpoint listening at {0}")]
    Unreachable(SocketAddr),

    #[error("address already in use: {0}")]
    AddressInUse(SocketAddr),

    #[error("endpoint is shut down")]
    Shutdown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_message_too_large() {
        let err = AquaTransportError::MessageTooLarge { size: 70_000, max: 65_507 };
        assert_eq!(err.to_string(), "message too large: 70000 bytes (max 65507)");
    }

    #[test]
    fn test_display_unreachable() {
        let addr: SocketAddr = "127.0.0.1:4711".parse().unwrap();
        let err = AquaTransportError::Unreachable(addr);
        assert_eq!(err.to_string(), "no endpoint listening at 127.0.0.1:4711");
    }
}
