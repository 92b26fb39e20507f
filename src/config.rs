use config::{Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// File looked up in the working directory when no `--config` is given
pub const DEFAULT_CONFIG_FILE: &str = "anchor-bridge";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerKind {
    Sqlite,
    Http,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub kind: LedgerKind,
    pub database_url: String,
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failures before an operator alert is logged
    pub alert_after_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log_dir: PathBuf,
    pub anchor_dir: PathBuf,
    /// Relay checkpoints; an empty value disables checkpointing
    pub checkpoint_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    pub discover_interval_secs: u64,
    pub submit_timeout_secs: u64,
    pub retry: RetryConfig,
    pub ledger: LedgerConfig,
    /// Identities to watch; empty means discover them from the anchor store
    #[serde(default)]
    pub identities: Vec<String>,
    pub sensor_interval_secs: u64,
    pub status_addr: Option<String>,
}

impl AppConfig {
    /// Load defaults, then the TOML file, then `ANCHOR__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_sources(path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix("ANCHOR")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("identities")
    }

    pub(crate) fn from_sources(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("log_dir", "data/event_logs")?
            .set_default("anchor_dir", "data/anchors")?
            .set_default("checkpoint_dir", "data/relay")?
            .set_default("poll_interval_ms", 1000)?
            .set_default("discover_interval_secs", 10)?
            .set_default("submit_timeout_secs", 10)?
            .set_default("retry.initial_backoff_ms", 500)?
            .set_default("retry.max_backoff_ms", 30_000)?
            .set_default("retry.alert_after_failures", 5)?
            .set_default("ledger.kind", "sqlite")?
            .set_default("ledger.database_url", "sqlite://data/ledger.db")?
            .set_default("ledger.timeout_secs", 10)?
            .set_default("sensor_interval_secs", 3)?;

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        let mut config: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        if config
            .checkpoint_dir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            config.checkpoint_dir = None;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("poll_interval_ms", self.poll_interval_ms),
            ("discover_interval_secs", self.discover_interval_secs),
            ("submit_timeout_secs", self.submit_timeout_secs),
            ("sensor_interval_secs", self.sensor_interval_secs),
            ("retry.initial_backoff_ms", self.retry.initial_backoff_ms),
            ("ledger.timeout_secs", self.ledger.timeout_secs),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(BridgeError::ConfigError(format!("{} must be greater than zero", key)));
            }
        }

        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(BridgeError::ConfigError(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".to_string(),
            ));
        }
        if self.retry.alert_after_failures == 0 {
            return Err(BridgeError::ConfigError(
                "retry.alert_after_failures must be at least 1".to_string(),
            ));
        }

        match self.ledger.kind {
            LedgerKind::Http if self.ledger.endpoint.as_deref().unwrap_or("").is_empty() => {
                Err(BridgeError::ConfigError(
                    "ledger.endpoint is required for the http ledger".to_string(),
                ))
            }
            LedgerKind::Sqlite if self.ledger.database_url.is_empty() => Err(BridgeError::ConfigError(
                "ledger.database_url is required for the sqlite ledger".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn discover_interval(&self) -> Duration {
        Duration::from_secs(self.discover_interval_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn sensor_interval(&self) -> Duration {
        Duration::from_secs(self.sensor_interval_secs)
    }
}
