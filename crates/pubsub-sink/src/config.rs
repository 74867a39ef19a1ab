//! Connector-level configuration.
//!
//! Declares a connector instance to the runtime. Connector-specific settings
//! travel as a flat string map and are parsed by the connector itself (see
//! [`SinkConfig::from_config_map`](crate::sinks::SinkConfig::from_config_map)).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level configuration for a connector instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Unique name identifying this connector instance.
    pub name: String,

    /// Identifier of the connector implementation.
    pub connector_class: String,

    /// Source topics this connector consumes.
    pub topics: Vec<String>,

    /// Arbitrary key-value configuration passed to the connector implementation.
    #[serde(default)]
    pub config: HashMap<String, String>,
}

impl ConnectorConfig {
    pub fn new(name: impl Into<String>, connector_class: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector_class: connector_class.into(),
            topics: Vec::new(),
            config: HashMap::new(),
        }
    }

    /// Add one connector setting.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Runtime state of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectorState {
    Running,
    Paused,
    Stopped,
    Failed,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectorState::Running => write!(f, "RUNNING"),
            ConnectorState::Paused => write!(f, "PAUSED"),
            ConnectorState::Stopped => write!(f, "STOPPED"),
            ConnectorState::Failed => write!(f, "FAILED"),
        }
    }
}
