use std::net::SocketAddr;
use std::time::Duration;

use aqua_protocol::{PeerId, TankConfig, TankEvent, TankHandle, TankRuntime};
use aqua_transport::{AquaNode, EndpointConfig};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::broker_addr;
use crate::events::{
    describe, emit, EventResolveResult, EventSnapshotResult, EventStarted, EventStatus,
};

pub struct TankArgs {
    pub broker: Option<SocketAddr>,
    pub bind: Option<SocketAddr>,
    pub secret: Option<String>,
    pub token_hold_ms: u64,
    pub direct_handoff: bool,
    pub json: bool,
}

/// A line typed on stdin.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Snapshot,
    Locate(String),
    Home(String),
    Resolve(String),
    Fish,
    Status,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or_default();
    let arg = words.next().map(str::to_string);
    match (cmd, arg) {
        ("snapshot", None) => Ok(Input::Snapshot),
        ("locate", Some(id)) => Ok(Input::Locate(id)),
        ("home", Some(id)) => Ok(Input::Home(id)),
        ("resolve", Some(id)) => Ok(Input::Resolve(id)),
        ("fish", None) => Ok(Input::Fish),
        ("status", None) => Ok(Input::Status),
        ("quit" | "exit", None) => Ok(Input::Quit),
        ("locate" | "home" | "resolve", None) => Err(format!("usage: {cmd} <id>")),
        _ => Err(format!(
            "unknown command: {line:?} (snapshot | locate <fish> | home <fish> | resolve <tank> | fish | status | quit)"
        )),
    }
}

pub async fn run(args: TankArgs) -> anyhow::Result<()> {
    let mut endpoint = EndpointConfig::new();
    if let Some(bind) = args.bind {
        endpoint = endpoint.bind_addr(bind);
    }
    let node = AquaNode::bind(endpoint).await?;
    let local = node.local_addr();

    let config = TankConfig {
        token_hold: Duration::from_millis(args.token_hold_ms),
        handoff_via_broker: !args.direct_handoff,
        secret: args.secret,
        ..TankConfig::new(broker_addr(args.broker))
    };
    let broker = config.broker_addr;
    let channels = TankRuntime::spawn(node, config)?;
    let handle = channels.handle;
    let mut events = channels.events;
    let json = args.json;

    if json {
        emit(&EventStarted::new("tank", &local.to_string()));
    }
    eprintln!("Tank on {local}, broker {broker}");
    eprintln!("Commands: snapshot | locate <fish> | home <fish> | resolve <tank> | fish | status | quit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_input(line.trim()) {
                        Ok(Input::Quit) => break,
                        Ok(input) => dispatch(&handle, input, json).await,
                        Err(usage) => eprintln!("{usage}"),
                    },
                    // EOF: keep swimming until Ctrl+C.
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!("stdin read failed: {e}");
                        stdin_open = false;
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                let fatal = matches!(event, TankEvent::Fatal { .. });
                if json {
                    emit(&event);
                } else {
                    println!("{}", describe(&event));
                }
                if fatal {
                    return Ok(());
                }
            }

            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCtrl+C received, leaving the ring...");
                break;
            }
        }
    }

    handle.shutdown().await;
    eprintln!("Tank stopped.");
    Ok(())
}

async fn dispatch(handle: &TankHandle, input: Input, json: bool) {
    match input {
        Input::Snapshot => {
            // The round can outlast several token rotations.
            let handle = handle.clone();
            tokio::spawn(async move {
                let result = handle.initiate_snapshot().await;
                if json {
                    let (total, error) = match result {
                        Ok(total) => (Some(total), None),
                        Err(e) => (None, Some(e.to_string())),
                    };
                    emit(&EventSnapshotResult {
                        event: "snapshot_result",
                        total,
                        error,
                    });
                } else {
                    match result {
                        Ok(total) => println!("snapshot result: {total} fish in the ring"),
                        Err(e) => eprintln!("snapshot failed: {e}"),
                    }
                }
            });
        }
        Input::Locate(fish_id) => report(handle.locate(fish_id).await),
        Input::Home(fish_id) => report(handle.locate_via_home(fish_id).await),
        Input::Resolve(tank_id) => {
            let handle = handle.clone();
            tokio::spawn(async move {
                // Unknown ids are never answered; the runtime times the lookup out.
                let address = match handle.resolve_name(PeerId::new(tank_id.clone())).await {
                    Ok(addr) => Some(addr),
                    Err(e) => {
                        tracing::debug!("resolve {tank_id} failed: {e}");
                        None
                    }
                };
                if json {
                    emit(&EventResolveResult {
                        event: "resolve_result",
                        tank_id,
                        address: address.map(|a| a.to_string()),
                    });
                } else {
                    match address {
                        Some(addr) => println!("{tank_id} is at {addr}"),
                        None => println!("{tank_id}: no answer"),
                    }
                }
            });
        }
        Input::Fish => report(handle.spawn_fish().await),
        Input::Status => match handle.status().await {
            Ok(status) if json => emit(&EventStatus {
                event: "status",
                status: &status,
            }),
            Ok(status) => {
                let id = status
                    .id
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "(unregistered)".into());
                let show = |a: Option<SocketAddr>| {
                    a.map(|a| a.to_string()).unwrap_or_else(|| "-".into())
                };
                println!(
                    "{id} @ {}  left={} right={} token={} snapshot={:?}",
                    status.local_addr,
                    show(status.left),
                    show(status.right),
                    status.has_token,
                    status.snapshot_phase,
                );
                for fish in &status.fish {
                    println!("  {} {:?} x={} y={}", fish.id, fish.direction, fish.x, fish.y);
                }
            }
            Err(e) => eprintln!("status failed: {e}"),
        },
        Input::Quit => {}
    }
}

fn report(result: Result<(), aqua_protocol::AquaProtocolError>) {
    if let Err(e) = result {
        eprintln!("command failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_input("snapshot"), Ok(Input::Snapshot));
        assert_eq!(
            parse_input("locate fish2@client1"),
            Ok(Input::Locate("fish2@client1".into()))
        );
        assert_eq!(parse_input("home fish1@client3"), Ok(Input::Home("fish1@client3".into())));
        assert_eq!(parse_input("resolve client2"), Ok(Input::Resolve("client2".into())));
        assert_eq!(parse_input("exit"), Ok(Input::Quit));
    }

    #[test]
    fn missing_argument_is_usage_error() {
        let err = parse_input("locate").unwrap_err();
        assert_eq!(err, "usage: locate <id>");
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(parse_input("feed the fish").is_err());
        assert!(parse_input("snapshot now").is_err());
    }
}
