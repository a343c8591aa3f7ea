use std::net::SocketAddr;
use std::time::Duration;

use crate::message::Message;

use super::TankEvent;

/// Intent produced by the pure logic in `TankState`.
///
/// Every `handle_*` / `on_*` method returns `Vec<TankEffect>`; the loop
/// carries them out through the transport, timers and event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TankEffect {
    /// Send a datagram.
    Send { to: SocketAddr, message: Message },

    /// Fire `TimerFired::TokenHold { epoch }` after `after`.
    ArmTokenTimer { epoch: u64, after: Duration },

    /// Fire `TimerFired::RenewLease` after `after`.
    ScheduleRenewal { after: Duration },

    /// Fire `TimerFired::LookupExpired { request_id }` after `after`.
    ExpireLookup { request_id: String, after: Duration },

    /// Notify the application.
    Emit(TankEvent),
}
