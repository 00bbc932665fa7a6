use anyhow::{ensure, Context};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line flags. Every flag can also come from the environment; both
/// take precedence over the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "vitals-agent", version, about = "Collects runtime and host metrics and reports them to a vitals server")]
pub struct Cli {
    /// TOML config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP address of the server (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC address of the server; selects the gRPC transport when set
    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Seconds between provider polls
    #[arg(short = 'p', long = "poll-interval", env = "POLL_INTERVAL")]
    pub poll_interval: Option<u64>,

    /// Seconds between reports
    #[arg(short = 'r', long = "report-interval", env = "REPORT_INTERVAL")]
    pub report_interval: Option<u64>,

    /// Maximum concurrent outbound requests per report
    #[arg(short = 'l', long = "rate-limit", env = "RATE_LIMIT")]
    pub rate_limit: Option<usize>,

    /// HMAC key for payload signing
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file with the server certificate or public key
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Log level for vitals crates
    #[arg(long = "log-level", env = "LOG_LVL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub grpc_address: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_report_interval() -> u64 {
    10
}

fn default_rate_limit() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            poll_interval_secs: default_poll_interval(),
            report_interval_secs: default_report_interval(),
            rate_limit: default_rate_limit(),
            key: None,
            crypto_key: None,
            log_level: default_log_level(),
        }
    }
}

impl AgentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Defaults, then the config file, then flags and environment.
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(v) = cli.address {
            config.address = v;
        }
        if let Some(v) = cli.grpc_address {
            config.grpc_address = Some(v);
        }
        if let Some(v) = cli.poll_interval {
            config.poll_interval_secs = v;
        }
        if let Some(v) = cli.report_interval {
            config.report_interval_secs = v;
        }
        if let Some(v) = cli.rate_limit {
            config.rate_limit = v;
        }
        if let Some(v) = cli.key {
            config.key = Some(v);
        }
        if let Some(v) = cli.crypto_key {
            config.crypto_key = Some(v);
        }
        if let Some(v) = cli.log_level {
            config.log_level = v;
        }
        config.grpc_address = config.grpc_address.filter(|a| !a.trim().is_empty());
        config.key = config.key.filter(|k| !k.is_empty());
        config.crypto_key = config.crypto_key.filter(|p| !p.as_os_str().is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.rate_limit >= 1, "rate limit must be at least 1");
        ensure!(self.poll_interval_secs >= 1, "poll interval must be at least 1s");
        ensure!(
            self.report_interval_secs >= self.poll_interval_secs,
            "report interval ({}s) must not be shorter than poll interval ({}s)",
            self.report_interval_secs,
            self.poll_interval_secs
        );
        ensure!(!self.address.trim().is_empty(), "server address must not be empty");
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AgentConfig::resolve(Cli::default()).unwrap();
        assert_eq!(config, AgentConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "address = \"metrics:9000\"\npoll_interval_secs = 5\nreport_interval_secs = 20\nrate_limit = 4"
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "vitals-agent",
            "-c",
            file.path().to_str().unwrap(),
            "-r",
            "30",
            "-k",
            "secret",
        ])
        .unwrap();
        let config = AgentConfig::resolve(cli).unwrap();
        assert_eq!(config.address, "metrics:9000");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.report_interval_secs, 30);
        assert_eq!(config.rate_limit, 4);
        assert_eq!(config.key.as_deref(), Some("secret"));
    }

    #[test]
    fn empty_key_disables_signing() {
        let cli = Cli {
            key: Some(String::new()),
            ..Cli::default()
        };
        assert_eq!(AgentConfig::resolve(cli).unwrap().key, None);
    }

    #[test]
    fn rejects_invalid_intervals() {
        let too_fast = Cli {
            poll_interval: Some(10),
            report_interval: Some(5),
            ..Cli::default()
        };
        assert!(AgentConfig::resolve(too_fast).is_err());

        let no_workers = Cli {
            rate_limit: Some(0),
            ..Cli::default()
        };
        assert!(AgentConfig::resolve(no_workers).is_err());

        let zero_poll = Cli {
            poll_interval: Some(0),
            ..Cli::default()
        };
        assert!(AgentConfig::resolve(zero_poll).is_err());
    }
}
