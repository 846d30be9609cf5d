//! Chameleon agent
//!
//! Connects to a controller, announces the execution it serves, and then
//! answers file transfers and model launches until the controller hangs up.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cm_agent::cli::{Args, Plan};
use cm_agent::{Collaborators, Connection, Registry};
use cm_protocol::ControlMessage;

#[tokio::main]
async fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        // Help and version go to stdout and exit 0; usage errors exit 1
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Chameleon agent starting...");

    let Plan {
        config,
        history_id,
        execution,
    } = Plan::from_args(&args)?;
    config.validate().context("Invalid agent configuration")?;

    tracing::info!(
        "Connecting to controller at {} for history {}",
        config.controller_address,
        history_id
    );

    let stream = tokio::time::timeout(
        config.connect_timeout(),
        TcpStream::connect(&config.controller_address),
    )
    .await
    .with_context(|| format!("Timed out connecting to {}", config.controller_address))?
    .with_context(|| format!("Failed to connect to {}", config.controller_address))?;
    stream.set_nodelay(true)?;

    let registry = Arc::new(Registry::standard());
    let collaborators = Collaborators::native(config.terminal.clone(), config.limits);
    let connection = Connection::from_stream(stream, registry, collaborators);

    connection
        .outbound()
        .send(ControlMessage::Launch {
            history_id,
            execution,
        })
        .await?;

    connection.run().await.context("Connection to controller failed")?;

    tracing::info!("Disconnected, exiting");
    Ok(())
}
