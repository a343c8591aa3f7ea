use std::net::SocketAddr;

/// Protocol-level errors for the Aqua ring.
///
/// Wraps transport errors and adds protocol-specific variants
/// (directory lookups, wire format, channel crypto).
#[derive(Debug, thiserror::Error)]
pub enum AquaProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] aqua_transport::AquaTransportError),

    #[error("unknown peer: {id}")]
    UnknownPeer { id: String },

    #[error("no peer registered at {address}")]
    UnknownAddress { address: SocketAddr },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("snapshot round abandoned before completion")]
    SnapshotAbandoned,

    #[error("name resolution for {tank_id} timed out")]
    LookupTimedOut { tank_id: String },

    #[error("tank has not joined a ring yet")]
    NotInRing,

    #[error("runtime shut down")]
    RuntimeShutDown,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<rmp_serde::encode::Error> for AquaProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        AquaProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for AquaProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        AquaProtocolError::Deserialization(e.to_string())
    }
}
