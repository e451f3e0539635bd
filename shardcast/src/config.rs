use crate::cli::Args;
use crate::consumer::PollPolicy;
use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use shardcast_stream::StartMode;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Kinesis caps GetRecords at 10000 records per call
pub const MAX_FETCH_LIMIT: usize = 10_000;

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub stream: StreamSettings,
    #[serde(default)]
    pub consumer: ConsumerSettings,
    /// Delivery statistics log interval in seconds (0 disables)
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Name of the stream records are relayed from (required)
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Endpoint override for the stream service
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Where partitions start reading. `latest` relays only what is appended
    /// after startup: replies to sessions that predate the process have no
    /// reader left.
    #[serde(default)]
    pub start_position: StartMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Maximum records per fetch
    pub fetch_limit: usize,
    /// Wait after a failed fetch before retrying the same cursor
    pub retry_interval_ms: u64,
    /// Wait between consecutive fetches on one partition
    pub pacing_interval_ms: u64,
    /// Partition rediscovery interval in seconds (0 = discover once)
    #[serde(default)]
    pub discovery_interval_secs: u64,
}

fn default_stats_interval() -> u64 {
    60
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            stream: StreamSettings::default(),
            consumer: ConsumerSettings::default(),
            stats_interval_secs: default_stats_interval(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            region: default_region(),
            endpoint_url: None,
            start_position: StartMode::Latest,
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            fetch_limit: 100,
            retry_interval_ms: 1000,
            pacing_interval_ms: 200,
            discovery_interval_secs: 0,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        match ext {
            "toml" => toml::from_str(&content)
                .map_err(|e| RelayError::Config(format!("TOML parse error: {}", e))),
            "json" => serde_json::from_str(&content)
                .map_err(|e| RelayError::Config(format!("JSON parse error: {}", e))),
            _ => Err(RelayError::Config(format!(
                "Unknown config file extension: {}",
                ext
            ))),
        }
    }

    pub fn from_args(args: &Args) -> Self {
        Self::from_args_with_env(args, |key| std::env::var(key).ok())
    }

    /// Build from parsed arguments, consulting `env` for the legacy variable
    /// names clap does not cover.
    pub fn from_args_with_env(args: &Args, env: impl Fn(&str) -> Option<String>) -> Self {
        let name = args
            .stream_name
            .clone()
            .or_else(|| env("RESPONSE_STREAM_NAME"))
            .unwrap_or_default();
        let region = args
            .region
            .clone()
            .or_else(|| env("REGION"))
            .unwrap_or_else(default_region);

        Self {
            listen_addr: SocketAddr::new(args.host, args.port),
            stream: StreamSettings {
                name,
                region,
                endpoint_url: args.endpoint_url.clone(),
                start_position: args.start_position,
            },
            consumer: ConsumerSettings {
                fetch_limit: args.fetch_limit,
                retry_interval_ms: args.retry_interval_ms,
                pacing_interval_ms: args.pacing_interval_ms,
                discovery_interval_secs: args.discovery_interval_secs,
            },
            stats_interval_secs: args.stats_interval_secs,
        }
    }

    /// Load the configuration the command line asks for and validate it
    pub fn load(args: &Args) -> Result<Self> {
        let config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::from_args(args),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.stream.name.trim().is_empty() {
            return Err(RelayError::Config(
                "STREAM_NAME is required (set --stream-name or STREAM_NAME)".into(),
            ));
        }
        if self.stream.region.trim().is_empty() {
            return Err(RelayError::Config("region must not be empty".into()));
        }
        if self.consumer.fetch_limit == 0 || self.consumer.fetch_limit > MAX_FETCH_LIMIT {
            return Err(RelayError::Config(format!(
                "fetch_limit must be between 1 and {}, got {}",
                MAX_FETCH_LIMIT, self.consumer.fetch_limit
            )));
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            fetch_limit: self.consumer.fetch_limit,
            retry_interval: Duration::from_millis(self.consumer.retry_interval_ms),
            pacing_interval: Duration::from_millis(self.consumer.pacing_interval_ms),
        }
    }

    pub fn discovery_interval(&self) -> Option<Duration> {
        match self.consumer.discovery_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        match self.stats_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::tempdir;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["shardcast"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.stream.region, "us-east-1");
        assert_eq!(config.stream.start_position, StartMode::Latest);
        assert_eq!(config.consumer.fetch_limit, 100);
        assert_eq!(config.consumer.retry_interval_ms, 1000);
        assert_eq!(config.consumer.pacing_interval_ms, 200);
        assert!(config.discovery_interval().is_none());
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_missing_stream_name_fails_validation() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert!(err.to_string().contains("STREAM_NAME"));
    }

    #[test]
    fn test_fetch_limit_bounds() {
        let mut config = Config::default();
        config.stream.name = "responses".into();
        assert!(config.validate().is_ok());

        config.consumer.fetch_limit = 0;
        assert!(config.validate().is_err());

        config.consumer.fetch_limit = MAX_FETCH_LIMIT + 1;
        assert!(config.validate().is_err());

        config.consumer.fetch_limit = MAX_FETCH_LIMIT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_args() {
        let args = parse(&[
            "--port",
            "9001",
            "--stream-name",
            "responses",
            "--region",
            "eu-west-1",
            "--start-position",
            "trim_horizon",
            "--fetch-limit",
            "250",
            "--pacing-interval-ms",
            "50",
            "--discovery-interval-secs",
            "30",
        ]);
        let config = Config::from_args_with_env(&args, no_env);

        assert_eq!(config.listen_addr.port(), 9001);
        assert_eq!(config.stream.name, "responses");
        assert_eq!(config.stream.region, "eu-west-1");
        assert_eq!(config.stream.start_position, StartMode::TrimHorizon);

        let policy = config.poll_policy();
        assert_eq!(policy.fetch_limit, 250);
        assert_eq!(policy.pacing_interval, Duration::from_millis(50));
        assert_eq!(config.discovery_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_legacy_env_fallbacks() {
        let args = parse(&["--port", "8080"]);
        let args = Args {
            stream_name: None,
            region: None,
            ..args
        };
        let config = Config::from_args_with_env(&args, |key| match key {
            "RESPONSE_STREAM_NAME" => Some("legacy-responses".into()),
            "REGION" => Some("ap-south-1".into()),
            _ => None,
        });

        assert_eq!(config.stream.name, "legacy-responses");
        assert_eq!(config.stream.region, "ap-south-1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_start_position_rejected() {
        let result = Args::try_parse_from(["shardcast", "--start-position", "yesterday"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("shardcast.toml");

        let toml_content = r#"
listen_addr = "127.0.0.1:9100"
stats_interval_secs = 0

[stream]
name = "transcripts"
region = "us-west-2"
endpoint_url = "http://localhost:4566"
start_position = "trim_horizon"

[consumer]
fetch_limit = 500
retry_interval_ms = 2000
pacing_interval_ms = 100
discovery_interval_secs = 60
"#;

        std::fs::write(&config_path, toml_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.listen_addr.port(), 9100);
        assert_eq!(config.stream.name, "transcripts");
        assert_eq!(
            config.stream.endpoint_url.as_deref(),
            Some("http://localhost:4566")
        );
        assert_eq!(config.stream.start_position, StartMode::TrimHorizon);
        assert_eq!(config.consumer.fetch_limit, 500);
        assert!(config.stats_interval().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_json_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("shardcast.json");

        let json_content = r#"{
            "listen_addr": "0.0.0.0:8081",
            "stream": {"name": "transcripts"}
        }"#;

        std::fs::write(&config_path, json_content).unwrap();

        let config = Config::from_file(&config_path).unwrap();
        assert_eq!(config.listen_addr.port(), 8081);
        assert_eq!(config.stream.region, DEFAULT_REGION);
        assert_eq!(config.stream.start_position, StartMode::Latest);
        assert_eq!(config.consumer.fetch_limit, 100);
        assert_eq!(config.stats_interval_secs, 60);
    }

    #[test]
    fn test_config_unknown_extension() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("shardcast.yaml");
        std::fs::write(&config_path, "stream: {}").unwrap();

        let result = Config::from_file(&config_path);
        assert!(result.is_err());
    }
}
