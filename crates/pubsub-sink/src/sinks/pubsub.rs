//! Pub/Sub Sink Connector
//!
//! Publishes records to a single Google Cloud Pub/Sub topic. Records are
//! batched per source partition and sent through a pool of publishers;
//! `flush()` waits until every accepted record has been acknowledged.
//!
//! Each record becomes one message whose data is the record value. The
//! source partition and topic are attached as the `kafka.partition` and
//! `kafka.topic` attributes, and the record key, when present, as `key`.
//! Only byte-string values are accepted.
//!
//! ## Configuration
//!
//! | Key                    | Description                               | Default                         |
//! |------------------------|-------------------------------------------|---------------------------------|
//! | `cps.project`          | Destination GCP project                   | required                        |
//! | `cps.topic`            | Destination topic                         | required                        |
//! | `batch.min_size`       | Buffered messages that trigger a flush    | `1000`                          |
//! | `request.max_bytes`    | Size ceiling of one publish request       | `10484736`                      |
//! | `request.max_messages` | Message ceiling of one publish request    | `1000`                          |
//! | `publisher.pool_size`  | Concurrent publisher connections          | `10`                            |
//! | `cps.endpoint`         | API root, or `emulator:///host:port`      | `https://pubsub.googleapis.com` |
//! | `cps.bearer_token`     | OAuth access token sent with requests     | none                            |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing;

use crate::buffer::{
    BatchPolicy, DEFAULT_MAX_MESSAGES_PER_REQUEST, DEFAULT_MAX_REQUEST_BYTES,
    DEFAULT_MIN_BATCH_SIZE,
};
use crate::dispatcher::BatchingDispatcher;
use crate::error::{Result, SinkError};
use crate::message::{PendingMessage, TopicName};
use crate::pool::PublisherPool;
use crate::traits::{SinkConnector, SinkRecord};
use crate::transport::{PublishTransport, RestTransport};

/// Default number of publishers per task.
pub const DEFAULT_PUBLISHER_POOL_SIZE: usize = 10;

fn default_min_batch_size() -> usize {
    DEFAULT_MIN_BATCH_SIZE
}

fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

fn default_max_messages_per_request() -> usize {
    DEFAULT_MAX_MESSAGES_PER_REQUEST
}

fn default_publisher_pool_size() -> usize {
    DEFAULT_PUBLISHER_POOL_SIZE
}

/// Parsed configuration for the Pub/Sub sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    #[serde(default = "default_max_messages_per_request")]
    pub max_messages_per_request: usize,
    #[serde(default = "default_publisher_pool_size")]
    pub publisher_pool_size: usize,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing)]
    pub bearer_token: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl SinkConfig {
    /// Config with defaults for everything but the destination.
    pub fn new(project: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            topic: topic.into(),
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_messages_per_request: DEFAULT_MAX_MESSAGES_PER_REQUEST,
            publisher_pool_size: DEFAULT_PUBLISHER_POOL_SIZE,
            endpoint: None,
            bearer_token: None,
        }
    }

    /// Parse a SinkConfig from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let project = config
            .get("cps.project")
            .ok_or_else(|| SinkError::ConfigError("missing required 'cps.project'".to_string()))?
            .clone();

        let topic = config
            .get("cps.topic")
            .ok_or_else(|| SinkError::ConfigError("missing required 'cps.topic'".to_string()))?
            .clone();

        let parsed = Self {
            project,
            topic,
            min_batch_size: parse_positive(config, "batch.min_size", DEFAULT_MIN_BATCH_SIZE)?,
            max_request_bytes: parse_positive(
                config,
                "request.max_bytes",
                DEFAULT_MAX_REQUEST_BYTES,
            )?,
            max_messages_per_request: parse_positive(
                config,
                "request.max_messages",
                DEFAULT_MAX_MESSAGES_PER_REQUEST,
            )?,
            publisher_pool_size: parse_positive(
                config,
                "publisher.pool_size",
                DEFAULT_PUBLISHER_POOL_SIZE,
            )?,
            endpoint: config.get("cps.endpoint").cloned(),
            bearer_token: config.get("cps.bearer_token").cloned(),
        };

        parsed.topic_name()?;
        Ok(parsed)
    }

    /// Destination topic, validated.
    pub fn topic_name(&self) -> Result<TopicName> {
        TopicName::new(self.project.clone(), self.topic.clone())
    }

    /// Admission thresholds, validated.
    pub fn batch_policy(&self) -> Result<BatchPolicy> {
        BatchPolicy::new(
            self.min_batch_size,
            self.max_request_bytes,
            self.max_messages_per_request,
        )
    }
}

fn parse_positive(config: &HashMap<String, String>, key: &str, default: usize) -> Result<usize> {
    let value = config
        .get(key)
        .map(|s| {
            s.parse::<usize>()
                .map_err(|e| SinkError::ConfigError(format!("invalid {}: {}", key, e)))
        })
        .transpose()?
        .unwrap_or(default);

    if value == 0 {
        return Err(SinkError::ConfigError(format!("{} must be positive", key)));
    }
    Ok(value)
}

/// Builds the transport behind each pooled publisher.
pub type TransportFactory = Arc<dyn Fn() -> Result<Arc<dyn PublishTransport>> + Send + Sync>;

/// Pub/Sub Sink Connector implementation.
///
/// `put` never waits on the network; `flush` and `stop` are the commit
/// barrier. A failed publish is fatal: every later call returns it.
pub struct PubSubSinkTask {
    name: String,
    config: SinkConfig,
    transport_factory: Option<TransportFactory>,
    dispatcher: Option<BatchingDispatcher>,
}

impl PubSubSinkTask {
    /// Create a new PubSubSinkTask with the given name and config map.
    pub fn new(name: &str, config_map: &HashMap<String, String>) -> Result<Self> {
        let config = SinkConfig::from_config_map(config_map)?;
        Ok(Self::with_config(name, config))
    }

    /// Create with an already-parsed config.
    pub fn with_config(name: &str, config: SinkConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            transport_factory: None,
            dispatcher: None,
        }
    }

    /// Create with an injected transport factory (useful for testing).
    pub fn with_transport(name: &str, config: SinkConfig, factory: TransportFactory) -> Self {
        Self {
            name: name.to_string(),
            config,
            transport_factory: Some(factory),
            dispatcher: None,
        }
    }

    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// The live dispatcher, once started.
    pub fn dispatcher(&self) -> Option<&BatchingDispatcher> {
        self.dispatcher.as_ref()
    }

    fn rest_factory(&self) -> TransportFactory {
        let endpoint = self.config.endpoint.clone();
        let token = self.config.bearer_token.clone();
        Arc::new(move || -> Result<Arc<dyn PublishTransport>> {
            let transport = RestTransport::new(endpoint.as_deref(), token.clone())?;
            Ok(Arc::new(transport) as Arc<dyn PublishTransport>)
        })
    }

    fn dispatcher_mut(&mut self) -> Result<&mut BatchingDispatcher> {
        let name = &self.name;
        self.dispatcher.as_mut().ok_or_else(|| {
            SinkError::RuntimeError(format!("connector '{}' has not been started", name))
        })
    }
}

#[async_trait]
impl SinkConnector for PubSubSinkTask {
    async fn start(&mut self) -> Result<()> {
        let topic = self.config.topic_name()?;
        let policy = self.config.batch_policy()?;
        let factory = match &self.transport_factory {
            Some(factory) => factory.clone(),
            None => self.rest_factory(),
        };

        let pool = PublisherPool::connect(&topic, self.config.publisher_pool_size, || {
            let factory = factory.clone();
            async move { factory() }
        })
        .await?;

        self.dispatcher = Some(BatchingDispatcher::new(
            topic.clone(),
            policy,
            Arc::new(pool),
        ));

        tracing::info!(
            connector = %self.name,
            topic = %topic,
            pool_size = self.config.publisher_pool_size,
            min_batch_size = policy.min_batch_size,
            "Pub/Sub sink connector started"
        );
        Ok(())
    }

    async fn put(&mut self, records: &[SinkRecord]) -> Result<()> {
        let connector = self.name.clone();
        let dispatcher = self.dispatcher_mut()?;

        for record in records {
            let pending = PendingMessage::from_record(record).map_err(|e| {
                tracing::warn!(
                    connector = %connector,
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %e,
                    "Rejecting record"
                );
                e
            })?;
            dispatcher.submit(&record.topic, record.partition, pending)?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let connector = self.name.clone();
        let dispatcher = self.dispatcher_mut()?;
        let stats = dispatcher.stats();
        dispatcher.drain().await?;

        tracing::debug!(
            connector = %connector,
            partitions = stats.buffered_partitions,
            messages = stats.buffered_messages,
            bytes = stats.buffered_bytes,
            "Flushed Pub/Sub sink"
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.drain().await?;
        }
        tracing::info!(connector = %self.name, "Pub/Sub sink connector stopped");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
