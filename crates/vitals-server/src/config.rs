use anyhow::{ensure, Context};
use clap::{ArgAction, Parser};
use ipnet::IpNet;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vitals_storage::StorageConfig;

/// Command-line flags. Every flag can also come from the environment; both
/// take precedence over the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "vitals-server", version, about = "Receives, stores and serves vitals metrics")]
pub struct Cli {
    /// TOML config file
    #[arg(short = 'c', long = "config", env = "CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address (host:port)
    #[arg(short = 'a', long, env = "ADDRESS")]
    pub address: Option<String>,

    /// gRPC listen address; gRPC is disabled when unset
    #[arg(short = 'g', long = "grpc-address", env = "GRPC_ADDRESS")]
    pub grpc_address: Option<String>,

    /// Seconds between snapshot saves, 0 saves on every update
    #[arg(short = 'i', long = "store-interval", env = "STORE_INTERVAL")]
    pub store_interval: Option<u64>,

    /// Snapshot file, empty disables snapshots
    #[arg(short = 'f', long = "file-storage-path", env = "FILE_STORAGE_PATH")]
    pub file_storage_path: Option<String>,

    /// Load the snapshot on start
    #[arg(short = 'r', long, env = "RESTORE", action = ArgAction::Set)]
    pub restore: Option<bool>,

    /// Database DSN; selects the relational backend when set
    #[arg(short = 'd', long = "database-dsn", env = "DATABASE_DSN")]
    pub database_dsn: Option<String>,

    /// HMAC key for request verification and response signing
    #[arg(short = 'k', long, env = "KEY")]
    pub key: Option<String>,

    /// PEM file with the RSA private key
    #[arg(long = "crypto-key", env = "CRYPTO_KEY")]
    pub crypto_key: Option<PathBuf>,

    /// Only accept agents whose X-Real-IP falls in this CIDR
    #[arg(short = 't', long = "trusted-subnet", env = "TRUSTED_SUBNET")]
    pub trusted_subnet: Option<String>,

    /// Log level for vitals crates
    #[arg(long = "log-level", env = "LOG_LVL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default)]
    pub grpc_address: Option<String>,
    #[serde(default = "default_store_interval")]
    pub store_interval_secs: u64,
    #[serde(default = "default_file_storage_path")]
    pub file_storage_path: Option<PathBuf>,
    #[serde(default = "default_restore")]
    pub restore: bool,
    #[serde(default)]
    pub database_dsn: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub crypto_key: Option<PathBuf>,
    #[serde(default)]
    pub trusted_subnet: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_address() -> String {
    "localhost:8080".to_string()
}

fn default_store_interval() -> u64 {
    300
}

fn default_file_storage_path() -> Option<PathBuf> {
    Some(PathBuf::from("/tmp/metrics-db.json"))
}

fn default_restore() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            grpc_address: None,
            store_interval_secs: default_store_interval(),
            file_storage_path: default_file_storage_path(),
            restore: default_restore(),
            database_dsn: None,
            key: None,
            crypto_key: None,
            trusted_subnet: None,
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
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
        if let Some(v) = cli.store_interval {
            config.store_interval_secs = v;
        }
        if let Some(v) = cli.file_storage_path {
            config.file_storage_path = Some(PathBuf::from(v));
        }
        if let Some(v) = cli.restore {
            config.restore = v;
        }
        if let Some(v) = cli.database_dsn {
            config.database_dsn = Some(v);
        }
        if let Some(v) = cli.key {
            config.key = Some(v);
        }
        if let Some(v) = cli.crypto_key {
            config.crypto_key = Some(v);
        }
        if let Some(v) = cli.trusted_subnet {
            config.trusted_subnet = Some(v);
        }
        if let Some(v) = cli.log_level {
            config.log_level = v;
        }
        config.grpc_address = config.grpc_address.filter(|a| !a.trim().is_empty());
        config.file_storage_path = config.file_storage_path.filter(|p| !p.as_os_str().is_empty());
        config.database_dsn = config.database_dsn.filter(|d| !d.trim().is_empty());
        config.key = config.key.filter(|k| !k.is_empty());
        config.crypto_key = config.crypto_key.filter(|p| !p.as_os_str().is_empty());
        config.trusted_subnet = config.trusted_subnet.filter(|s| !s.trim().is_empty());
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.address.trim().is_empty(), "listen address must not be empty");
        self.trusted_net()?;
        Ok(())
    }

    pub fn trusted_net(&self) -> anyhow::Result<Option<IpNet>> {
        self.trusted_subnet
            .as_deref()
            .map(|s| {
                s.trim()
                    .parse::<IpNet>()
                    .with_context(|| format!("trusted subnet {s:?} is not a CIDR"))
            })
            .transpose()
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            database_dsn: self.database_dsn.clone(),
            file_path: self.file_storage_path.clone(),
            store_interval: Duration::from_secs(self.store_interval_secs),
            restore: self.restore,
        }
    }
}
