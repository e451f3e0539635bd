use clap::Parser;
use shardcast_stream::StartMode;
use std::net::IpAddr;
use std::path::PathBuf;

/// Command line, with every option also readable from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "shardcast")]
#[command(about = "Relays stream records to the WebSocket client each record targets")]
#[command(version)]
pub struct Args {
    #[arg(long, env = "LISTEN_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Stream to relay from (falls back to RESPONSE_STREAM_NAME)
    #[arg(short, long, env = "STREAM_NAME")]
    pub stream_name: Option<String>,

    /// Stream region (falls back to REGION, then us-east-1)
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Override the stream service endpoint
    #[arg(long, env = "STREAM_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Where new partitions start reading: latest or trim_horizon
    #[arg(long, env = "START_POSITION", default_value_t = StartMode::Latest)]
    pub start_position: StartMode,

    #[arg(long, env = "FETCH_LIMIT", default_value_t = 100)]
    pub fetch_limit: usize,

    #[arg(long, env = "RETRY_INTERVAL_MS", default_value_t = 1000)]
    pub retry_interval_ms: u64,

    #[arg(long, env = "PACING_INTERVAL_MS", default_value_t = 200)]
    pub pacing_interval_ms: u64,

    /// Re-list partitions this often; 0 discovers once at startup
    #[arg(long, env = "DISCOVERY_INTERVAL_SECS", default_value_t = 0)]
    pub discovery_interval_secs: u64,

    /// Log delivery statistics this often; 0 disables
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value_t = 60)]
    pub stats_interval_secs: u64,

    /// TOML or JSON config file; replaces all other options when given
    #[arg(short, long, env = "SHARDCAST_CONFIG")]
    pub config: Option<PathBuf>,
}
