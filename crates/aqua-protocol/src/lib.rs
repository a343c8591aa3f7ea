//! Aqua ring protocol layer.
//!
//! A broker keeps an ordered ring of tanks and tells each one who its
//! neighbours are. Tanks pass fish to each other, circulate a single
//! mutual-exclusion token leftward, take Chandy–Lamport snapshots of the
//! fish population and route location requests around the ring.
//!
//! Wire format: MessagePack (compact binary), optionally sealed with
//! XChaCha20-Poly1305 under a ring-wide passphrase.

pub mod broker;
pub mod codec;
pub mod crypto;
pub mod directory;
pub mod error;
pub mod fish;
pub mod message;
pub mod tank;
pub mod transport;
pub mod types;

pub use broker::{Broker, BrokerConfig, BrokerHandle, BrokerState, Outbound};
pub use codec::WireCodec;
pub use crypto::{ChannelCipher, SealedFrame};
pub use directory::{Neighbours, PeerRecord, Registration, Removal, RingDirectory};
pub use error::AquaProtocolError;
pub use fish::{home_tank_of, Fish};
pub use message::Message;
pub use tank::{
    SnapshotPhase, TankChannels, TankCommand, TankConfig, TankEffect, TankEvent, TankHandle,
    TankRuntime, TankState, TankStatus,
};
pub use transport::Transport;
pub use types::{
    now_ms, Direction, FishLocation, PeerId, DEFAULT_BROKER_PORT, DEFAULT_LEASE_TIME_MS,
    DEFAULT_TOKEN_HOLD_MS,
};
