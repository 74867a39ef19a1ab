//! Publish transport.
//!
//! [`PublishTransport`] is the seam between the batching engine and the
//! network. Retries, timeouts and authentication belong to the transport;
//! the engine only sees success or a final error per request.
//!
//! [`RestTransport`] speaks the Pub/Sub v1 JSON API:
//!
//! ```text
//! POST {root}/v1/projects/{project}/topics/{topic}:publish
//! {"messages":[{"data":"<base64>","attributes":{...}}]}
//!
//! 200 {"messageIds":["1","2"]}
//! ```

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use tracing::debug;

use crate::emulator;
use crate::error::{Result, SinkError};
use crate::message::{PubsubMessage, TopicName};

/// Production API root.
pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";

/// Server reply to a publish request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    /// Server-assigned ids, one per published message, in request order.
    #[serde(default)]
    pub message_ids: Vec<String>,
}

/// A network client able to publish a batch of messages to a topic.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn publish(&self, topic: &TopicName, messages: &[PubsubMessage])
        -> Result<PublishResponse>;
}

/// Pub/Sub REST client.
#[derive(Debug, Clone)]
pub struct RestTransport {
    client: reqwest::Client,
    root: String,
    bearer_token: Option<String>,
}

impl RestTransport {
    /// Build a transport for `endpoint` (or the production API).
    ///
    /// An emulator endpoint, or `PUBSUB_EMULATOR_HOST`, switches to plain
    /// HTTP and drops the bearer token.
    pub fn new(endpoint: Option<&str>, bearer_token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            SinkError::ConnectionError(format!("failed to build HTTP client: {}", e))
        })?;

        let transport = match emulator::emulator_endpoint(endpoint) {
            Some(host) => {
                debug!(host = %host, "Using Pub/Sub emulator");
                Self::with_client(client, format!("http://{}", host), None)
            }
            None => Self::with_client(
                client,
                endpoint.unwrap_or(DEFAULT_ENDPOINT).to_string(),
                bearer_token,
            ),
        };
        Ok(transport)
    }

    /// Create with an injected reqwest client and explicit API root.
    pub fn with_client(
        client: reqwest::Client,
        root: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            client,
            root: root.into().trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn publish_url(&self, topic: &TopicName) -> String {
        format!("{}/v1/{}:publish", self.root, topic.path())
    }

    /// Build the JSON body of a publish request.
    pub fn build_body(messages: &[PubsubMessage]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "data": STANDARD.encode(m.data()),
                    "attributes": m.attributes(),
                })
            })
            .collect();
        serde_json::json!({ "messages": messages })
    }
}

#[async_trait]
impl PublishTransport for RestTransport {
    async fn publish(
        &self,
        topic: &TopicName,
        messages: &[PubsubMessage],
    ) -> Result<PublishResponse> {
        let mut request = self
            .client
            .post(self.publish_url(topic))
            .json(&Self::build_body(messages));
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            SinkError::ConnectionError(format!("Pub/Sub request to {} failed: {}", topic, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(SinkError::TransportError {
                topic: topic.path(),
                messages: messages.len(),
                reason: format!("publish API returned {}: {}", status, body_text),
            });
        }

        let reply: PublishResponse = response.json().await.map_err(|e| {
            SinkError::SerializationError(format!("failed to parse publish response: {}", e))
        })?;

        if reply.message_ids.len() != messages.len() {
            return Err(SinkError::TransportError {
                topic: topic.path(),
                messages: messages.len(),
                reason: format!(
                    "publish API acknowledged {} of {} messages",
                    reply.message_ids.len(),
                    messages.len()
                ),
            });
        }

        Ok(reply)
    }
}
