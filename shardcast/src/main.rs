#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use clap::Parser;
use shardcast::cli::Args;
use shardcast::{Config, Relay, shutdown};
use shardcast_stream::StreamSource;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_tracing();

    let config = match Config::load(&args) {
        Ok(c) => c,
        Err(e) => {
            error!(target: "shardcast", error = %e, "Invalid configuration");
            std::process::exit(1);
        },
    };

    info!(
        target: "shardcast",
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen_addr,
        stream = %config.stream.name,
        region = %config.stream.region,
        start_position = %config.stream.start_position,
        "Starting shardcast"
    );

    let source = match connect_stream(&config).await {
        Ok(source) => source,
        Err(e) => {
            error!(target: "shardcast", error = %e, "Failed to set up stream client");
            std::process::exit(1);
        },
    };

    let listener = match TcpListener::bind(config.listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(
                target: "shardcast",
                error = %e,
                addr = %config.listen_addr,
                "Failed to bind listener"
            );
            std::process::exit(1);
        },
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    tokio::spawn(shutdown::install_signal_handlers(shutdown_tx.clone()));

    match Relay::new(config, source).run(listener, shutdown_tx).await {
        Ok(()) => info!(target: "shardcast", "shardcast shutdown complete"),
        Err(e) => {
            error!(target: "shardcast", error = %e, "Relay failed");
            std::process::exit(1);
        },
    }
}

#[cfg(feature = "kinesis")]
async fn connect_stream(config: &Config) -> shardcast::Result<Arc<dyn StreamSource>> {
    use shardcast_stream::{KinesisConfig, KinesisStream};

    let stream = KinesisStream::connect(KinesisConfig {
        stream_name: config.stream.name.clone(),
        region: config.stream.region.clone(),
        endpoint_url: config.stream.endpoint_url.clone(),
    })
    .await;

    Ok(Arc::new(stream))
}

#[cfg(not(feature = "kinesis"))]
async fn connect_stream(_config: &Config) -> shardcast::Result<Arc<dyn StreamSource>> {
    Err(shardcast::RelayError::Config(
        "built without a stream backend (enable the `kinesis` feature)".into(),
    ))
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardcast=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();
}
