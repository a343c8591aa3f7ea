use std::io::Write;

use aqua_protocol::{TankEvent, TankStatus};
use serde::Serialize;

/// Emit a JSON event line to stdout.
pub fn emit<T: Serialize>(event: &T) {
    if let Ok(json) = serde_json::to_string(event) {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        let _ = writeln!(lock, "{json}");
        let _ = lock.flush();
    }
}

#[derive(Serialize)]
pub struct EventStarted {
    pub event: &'static str,
    pub role: String,
    pub addr: String,
}

impl EventStarted {
    pub fn new(role: &str, addr: &str) -> Self {
        Self {
            event: "started",
            role: role.to_string(),
            addr: addr.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct EventSnapshotResult {
    pub event: &'static str,
    pub total: Option<u64>,
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct EventResolveResult {
    pub event: &'static str,
    pub tank_id: String,
    pub address: Option<String>,
}

#[derive(Serialize)]
pub struct EventStatus<'a> {
    pub event: &'static str,
    #[serde(flatten)]
    pub status: &'a TankStatus,
}

/// One-line human rendering of a runtime event.
pub fn describe(event: &TankEvent) -> String {
    match event {
        TankEvent::Registered {
            id,
            lease_time_ms,
            renewed,
        } => {
            if *renewed {
                format!("lease renewed as {id} ({lease_time_ms} ms)")
            } else {
                format!("registered as {id} (lease {lease_time_ms} ms)")
            }
        }
        TankEvent::NeighbourChanged { side, address } => {
            format!("{side} neighbour is now {address}")
        }
        TankEvent::TokenAcquired => "token acquired".to_string(),
        TankEvent::TokenReleased { to } => format!("token passed to {to}"),
        TankEvent::FishSpawned { fish_id } => format!("spawned {fish_id}"),
        TankEvent::FishDeparted { fish_id, direction } => {
            format!("{fish_id} swam out {direction}")
        }
        TankEvent::FishArrived { fish_id, from } => format!("{fish_id} arrived from {from}"),
        TankEvent::FishReversed { fish_id } => format!("{fish_id} turned around"),
        TankEvent::FishToggled { fish_id, toggled } => {
            let state = if *toggled { "on" } else { "off" };
            format!("{fish_id} toggled {state}")
        }
        TankEvent::LocationForwarded { fish_id, to } => {
            format!("location request for {fish_id} forwarded to {to}")
        }
        TankEvent::SnapshotStarted { count, initiator } => {
            let who = if *initiator { "initiated" } else { "joined" };
            format!("snapshot {who}, {count} local fish")
        }
        TankEvent::SnapshotClosed { count } => format!("snapshot recorded {count} fish"),
        TankEvent::SnapshotCompleted { total } => format!("snapshot total: {total} fish"),
        TankEvent::SnapshotAbandoned => "unfinished snapshot round abandoned".to_string(),
        TankEvent::NameResolved {
            request_id,
            address,
        } => format!("name request {request_id} resolved to {address}"),
        TankEvent::Error { description } => format!("error: {description}"),
        TankEvent::Fatal { description } => format!("fatal: {description}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_snapshot_completed() {
        let line = describe(&TankEvent::SnapshotCompleted { total: 7 });
        assert_eq!(line, "snapshot total: 7 fish");
    }

    #[test]
    fn describe_toggle() {
        let line = describe(&TankEvent::FishToggled {
            fish_id: "fish1@client1".into(),
            toggled: true,
        });
        assert_eq!(line, "fish1@client1 toggled on");
    }

    #[test]
    fn result_event_serializes_with_tag() {
        let json = serde_json::to_string(&EventSnapshotResult {
            event: "snapshot_result",
            total: Some(3),
            error: None,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"snapshot_result\""));
        assert!(json.contains("\"total\":3"));
    }
}
