/// Message catalog exchanged between tanks and the broker.
///
/// One enum covers every datagram on the wire; the codec serializes it
/// with MessagePack and optionally seals it (see `codec`).
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::fish::Fish;
use crate::types::{Direction, FishLocation, PeerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Tank → broker: join the ring or renew the lease.
    RegisterRequest,
    /// Broker → tank: assigned id and lease duration.
    RegisterResponse { id: PeerId, lease_time_ms: u64 },
    /// Tank → broker: leave the ring.
    DeregisterRequest { id: PeerId },
    /// Carries a fish to the next tank, directly or relayed by the broker.
    HandoffRequest { fish: Fish },
    /// Broker → tank: the neighbour on `side` is now at `address`.
    NeighbourUpdate { side: Direction, address: SocketAddr },
    /// The mutual-exclusion token. Always travels leftward.
    Token,
    SnapshotMarker,
    /// Collection pass of a snapshot, carrying the running sum.
    SnapshotToken { accumulated_count: u64 },
    LocationRequest { fish_id: String },
    LocationUpdate {
        fish_id: String,
        disposition: FishLocation,
    },
    NameResolutionRequest { tank_id: PeerId, request_id: String },
    NameResolutionResponse {
        address: SocketAddr,
        request_id: String,
    },
    /// Stops the broker.
    PoisonPill,
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RegisterRequest => "RegisterRequest",
            Message::RegisterResponse { .. } => "RegisterResponse",
            Message::DeregisterRequest { .. } => "DeregisterRequest",
            Message::HandoffRequest { .. } => "HandoffRequest",
            Message::NeighbourUpdate { .. } => "NeighbourUpdate",
            Message::Token => "Token",
            Message::SnapshotMarker => "SnapshotMarker",
            Message::SnapshotToken { .. } => "SnapshotToken",
            Message::LocationRequest { .. } => "LocationRequest",
            Message::LocationUpdate { .. } => "LocationUpdate",
            Message::NameResolutionRequest { .. } => "NameResolutionRequest",
            Message::NameResolutionResponse { .. } => "NameResolutionResponse",
            Message::PoisonPill => "PoisonPill",
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, crate::AquaProtocolError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, crate::AquaProtocolError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}
