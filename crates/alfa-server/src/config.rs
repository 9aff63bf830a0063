//! Configuration management for the `alfa-lock` binary
//!
//! Sources in increasing precedence: the config file (`conf/alfa.toml` or
//! `--config`), `ALFA_*` environment variables (`__` separates nested keys,
//! e.g. `ALFA_LOCK__DEFAULT_TTL_MS`), then command line flags.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use config::{Config, Environment};
use serde::Deserialize;

use alfa_common::AlfaError;
use alfa_lock::{LockConfig, RedisLockStore, RedisStoreConfig, SharedStore};

use crate::startup::{LogRotation, LoggingConfig};

/// Looked up with any supported extension (`alfa.toml`, `alfa.yaml`, ...)
pub const DEFAULT_CONFIG_FILE: &str = "conf/alfa";

const ENV_PREFIX: &str = "ALFA";

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "alfa-lock", version, about = "Redlock-style distributed lock coordinator")]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "ALFA_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Redis backend URL; repeat or comma-separate for several nodes. Replaces configured backends.
    #[arg(long = "backend", env = "ALFA_REDIS_URLS", value_delimiter = ',')]
    pub backends: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level")]
    pub log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long = "metrics-addr")]
    pub metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ping every backend and report whether a quorum is reachable
    Check,
    /// Acquire a lock and keep it until interrupted
    Hold(HoldArgs),
    /// Run a command while holding a lock
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct LockArgs {
    /// Lock key
    #[arg(short = 'k', long = "key")]
    pub key: String,

    /// Lease TTL in milliseconds (default from configuration)
    #[arg(long = "ttl-ms")]
    pub ttl_ms: Option<u64>,

    /// How long to keep retrying acquisition
    #[arg(long = "wait-ms", default_value_t = 0)]
    pub wait_ms: u64,
}

impl LockArgs {
    pub fn ttl(&self, config: &LockConfig) -> Duration {
        self.ttl_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.default_ttl())
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

#[derive(Debug, Clone, Args)]
pub struct HoldArgs {
    #[command(flatten)]
    pub lock: LockArgs,

    /// Release after this many milliseconds instead of waiting for a signal
    #[arg(long = "hold-ms")]
    pub hold_ms: Option<u64>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub lock: LockArgs,

    /// Program and arguments, after `--`
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_true")]
    pub console: bool,
    #[serde(default)]
    pub file: bool,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub rotation: LogRotation,
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: None,
            console: true,
            file: false,
            level: default_level(),
            rotation: LogRotation::Daily,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Independent Redis nodes, one lock store each
    #[serde(default)]
    pub backends: Vec<RedisStoreConfig>,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub metrics_addr: Option<String>,
    /// Backend URLs given on the command line
    #[serde(skip)]
    pub backend_urls: Vec<String>,
}

impl AppConfig {
    pub fn load(cli: &Cli) -> Result<Self, AlfaError> {
        let mut builder = Config::builder();
        builder = match &cli.config {
            Some(path) => builder.add_source(config::File::from(path.as_path())),
            None => builder.add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(level) = &cli.log_level {
            builder = builder
                .set_override("logging.level", level.as_str())
                .map_err(config_error)?;
        }
        if let Some(addr) = cli.metrics_addr {
            builder = builder
                .set_override("metrics_addr", addr.to_string())
                .map_err(config_error)?;
        }

        let mut app: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;
        app.backend_urls = cli.backends.clone();
        Ok(app)
    }

    pub fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::from_config(
            self.logging.dir.clone(),
            self.logging.console,
            self.logging.file,
            &self.logging.level,
            self.logging.rotation,
        )
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, AlfaError> {
        self.metrics_addr
            .as_deref()
            .map(|addr| {
                addr.parse().map_err(|e| {
                    AlfaError::ConfigError(format!("invalid metrics_addr '{}': {}", addr, e))
                })
            })
            .transpose()
    }

    /// One lock store per configured node
    ///
    /// Command line URLs take precedence over `backends`.
    pub fn build_stores(&self) -> Result<Vec<SharedStore>, AlfaError> {
        let stores: Vec<RedisLockStore> = if self.backend_urls.is_empty() {
            self.backends
                .iter()
                .map(RedisLockStore::new)
                .collect::<Result<Vec<_>, _>>()
        } else {
            self.backend_urls
                .iter()
                .map(|url| RedisLockStore::from_url(url))
                .collect::<Result<Vec<_>, _>>()
        }
        .map_err(|e| AlfaError::ConfigError(e.to_string()))?;

        if stores.is_empty() {
            return Err(AlfaError::ConfigError(
                "no lock backends configured".to_string(),
            ));
        }
        Ok(stores
            .into_iter()
            .map(|store| Arc::new(store) as SharedStore)
            .collect())
    }
}

fn config_error(err: config::ConfigError) -> AlfaError {
    AlfaError::ConfigError(err.to_string())
}
