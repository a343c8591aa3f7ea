mod broker;
mod common;
mod events;
mod poison;
mod tank;

use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aqua-node", about = "Run a piece of the Aqua tank ring")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the broker until a poison pill arrives or Ctrl+C.
    Broker {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:4711")]
        bind: SocketAddr,
        /// Lease granted to tanks, in ms.
        #[arg(long, default_value = "3000")]
        lease_ms: u64,
        /// Datagrams handled concurrently.
        #[arg(long, default_value = "8")]
        workers: usize,
        /// Ring-wide channel secret.
        #[arg(long)]
        secret: Option<String>,
    },

    /// Run a headless tank. Reads commands from stdin.
    Tank {
        /// Broker address (default: $AQUA_BROKER_ADDR or 127.0.0.1:4711).
        #[arg(long)]
        broker: Option<SocketAddr>,
        /// Local address (default: $AQUA_BIND_ADDR or an ephemeral port).
        #[arg(long)]
        bind: Option<SocketAddr>,
        /// Ring-wide channel secret.
        #[arg(long)]
        secret: Option<String>,
        /// Token hold time in ms.
        #[arg(long, default_value = "3000")]
        token_hold_ms: u64,
        /// Send handoffs straight to the neighbour instead of via the broker.
        #[arg(long)]
        direct_handoff: bool,
        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },

    /// Tell a broker to stop.
    Poison {
        /// Broker address (default: $AQUA_BROKER_ADDR or 127.0.0.1:4711).
        #[arg(long)]
        broker: Option<SocketAddr>,
        /// Ring-wide channel secret.
        #[arg(long)]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    eprintln!("aqua-node v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Broker {
            bind,
            lease_ms,
            workers,
            secret,
        } => {
            broker::run(broker::BrokerArgs {
                bind,
                lease_ms,
                workers,
                secret,
            })
            .await?;
        }

        Command::Tank {
            broker,
            bind,
            secret,
            token_hold_ms,
            direct_handoff,
            json,
        } => {
            tank::run(tank::TankArgs {
                broker,
                bind,
                secret,
                token_hold_ms,
                direct_handoff,
                json,
            })
            .await?;
        }

        Command::Poison { broker, secret } => {
            poison::run(broker, secret).await?;
        }
    }

    Ok(())
}
