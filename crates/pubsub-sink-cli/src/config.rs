//! Configuration management for pubsub-sink
//!
//! Settings come from a TOML file (`--config`, or `~/.pubsub-sink/config.toml`
//! when present) and are then overridden by command-line flags and their
//! environment variables.
//!
//! ```toml
//! connector_name = "orders-to-pubsub"
//!
//! [sink]
//! project = "my-project"
//! topic = "orders"
//! min_batch_size = 500
//! publisher_pool_size = 4
//!
//! [runtime]
//! commit_interval_ms = 2000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use pubsub_sink::{RuntimeOptions, SinkConfig};

fn default_connector_name() -> String {
    "pubsub-sink".to_string()
}

fn default_commit_interval_ms() -> u64 {
    5_000
}

fn default_poll_backoff_ms() -> u64 {
    100
}

fn default_read_batch_size() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name the connector runs under; shows up in every log line.
    #[serde(default = "default_connector_name")]
    pub connector_name: String,

    #[serde(default)]
    pub sink: SinkConfig,

    #[serde(default)]
    pub runtime: RuntimeSection,
}

/// Timing of the connector loop and input reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    #[serde(default = "default_poll_backoff_ms")]
    pub poll_backoff_ms: u64,

    /// Input lines handed to the sink per `put()`.
    #[serde(default = "default_read_batch_size")]
    pub read_batch_size: usize,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            commit_interval_ms: default_commit_interval_ms(),
            poll_backoff_ms: default_poll_backoff_ms(),
            read_batch_size: default_read_batch_size(),
        }
    }
}

impl RuntimeSection {
    pub fn options(&self) -> RuntimeOptions {
        RuntimeOptions {
            commit_interval: Duration::from_millis(self.commit_interval_ms),
            poll_backoff: Duration::from_millis(self.poll_backoff_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            connector_name: default_connector_name(),
            sink: SinkConfig::default(),
            runtime: RuntimeSection::default(),
        }
    }
}

/// Values supplied on the command line, each replacing its file setting.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project: Option<String>,
    pub topic: Option<String>,
    pub endpoint: Option<String>,
    pub bearer_token: Option<String>,
    pub min_batch_size: Option<usize>,
    pub pool_size: Option<usize>,
    pub commit_interval_ms: Option<u64>,
}

impl Config {
    /// Load config from `path`, or from the default location if it exists.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let path = Self::config_path();
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    Ok(Config::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Default config file path (~/.pubsub-sink/config.toml)
    fn config_path() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".pubsub-sink").join("config.toml")
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(project) = overrides.project {
            self.sink.project = project;
        }
        if let Some(topic) = overrides.topic {
            self.sink.topic = topic;
        }
        if let Some(endpoint) = overrides.endpoint {
            self.sink.endpoint = Some(endpoint);
        }
        if let Some(token) = overrides.bearer_token {
            self.sink.bearer_token = Some(token);
        }
        if let Some(size) = overrides.min_batch_size {
            self.sink.min_batch_size = size;
        }
        if let Some(size) = overrides.pool_size {
            self.sink.publisher_pool_size = size;
        }
        if let Some(ms) = overrides.commit_interval_ms {
            self.runtime.commit_interval_ms = ms;
        }
    }

    /// Reject configs the sink would refuse at start.
    pub fn validate(&self) -> Result<()> {
        self.sink
            .topic_name()
            .context("destination topic is not set (use --project and --topic)")?;
        self.sink.batch_policy().context("invalid batch settings")?;
        if self.sink.publisher_pool_size == 0 {
            anyhow::bail!("publisher_pool_size must be at least 1");
        }
        if self.runtime.read_batch_size == 0 {
            anyhow::bail!("read_batch_size must be at least 1");
        }
        Ok(())
    }

    /// The config as TOML, without secrets.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
