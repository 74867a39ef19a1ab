//! Typed sink writers.
//!
//! [`PubSubSink`] publishes typed elements to one topic. Every writer it
//! creates draws its publisher from the process-wide [`PublisherCache`], so
//! all writers for a topic share a single connection. Elements are turned
//! into messages by a [`SerializationSchema`].
//!
//! ```ignore
//! let sink = PubSubSink::<Order>::builder()
//!     .project("my-project")
//!     .topic("orders")
//!     .schema(JsonSchema::new())
//!     .build()?;
//!
//! let mut writer = sink.create_writer().await?;
//! writer.write(&order)?;
//! writer.flush().await?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::cache::PublisherCache;
use crate::error::{Result, SinkError};
use crate::message::{PubsubMessage, TopicName};
use crate::publisher::Publisher;
use crate::sinks::TransportFactory;
use crate::transport::{PublishTransport, RestTransport};

/// Turns an element into a publishable message.
pub trait SerializationSchema<T>: Send + Sync {
    /// Called once per writer before the first element.
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn serialize(&self, element: &T) -> Result<PubsubMessage>;
}

/// Publishes raw bytes as the message payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSchema;

impl SerializationSchema<Bytes> for BytesSchema {
    fn serialize(&self, element: &Bytes) -> Result<PubsubMessage> {
        Ok(PubsubMessage::from_data(element.clone()))
    }
}

/// Publishes the JSON encoding of the element.
#[derive(Debug, Clone, Copy)]
pub struct JsonSchema<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> JsonSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> SerializationSchema<T> for JsonSchema<T> {
    fn serialize(&self, element: &T) -> Result<PubsubMessage> {
        Ok(PubsubMessage::from_data(serde_json::to_vec(element)?))
    }
}

/// A shared publisher plus the publishes issued through it.
///
/// `flush` waits for every outstanding publish, so one writer can commit
/// without waiting on other writers sharing the same publisher.
#[derive(Debug)]
pub struct FlushablePublisher {
    publisher: Arc<Publisher>,
    outstanding: Vec<JoinHandle<Result<()>>>,
}

impl FlushablePublisher {
    pub fn new(publisher: Arc<Publisher>) -> Self {
        Self {
            publisher,
            outstanding: Vec::new(),
        }
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Start publishing one message.
    ///
    /// Does not wait for the reply. Returns the failure of any earlier
    /// publish that has already completed unsuccessfully.
    pub fn publish(&mut self, message: PubsubMessage) -> Result<()> {
        let mut failure = None;
        self.outstanding.retain_mut(|handle| {
            if !handle.is_finished() {
                return true;
            }
            if let Some(Err(e)) = handle.now_or_never().map(join_outcome) {
                failure.get_or_insert(e);
            }
            false
        });
        if let Some(e) = failure {
            return Err(e);
        }

        let publisher = Arc::clone(&self.publisher);
        self.outstanding.push(tokio::spawn(async move {
            publisher
                .publish(std::slice::from_ref(&message))
                .await
                .map(|_| ())
                .map_err(|e| {
                    error!(topic = %publisher.topic(), error = %e, "Failed to publish message");
                    e
                })
        }));
        Ok(())
    }

    /// Wait for every outstanding publish and return the first failure.
    pub async fn flush(&mut self) -> Result<()> {
        let mut first = None;
        for handle in self.outstanding.drain(..) {
            if let Err(e) = join_outcome(handle.await) {
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn join_outcome(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| SinkError::RuntimeError(format!("publish task failed: {}", e)))?
}

/// Writes typed elements through a [`FlushablePublisher`].
pub struct PubSubSinkWriter<T> {
    publisher: FlushablePublisher,
    schema: Arc<dyn SerializationSchema<T>>,
}

impl<T> PubSubSinkWriter<T> {
    pub fn new(publisher: FlushablePublisher, schema: Arc<dyn SerializationSchema<T>>) -> Self {
        Self { publisher, schema }
    }

    /// Serialize `element` and start publishing it.
    pub fn write(&mut self, element: &T) -> Result<()> {
        let message = self.schema.serialize(element)?;
        self.publisher.publish(message)
    }

    /// Wait until every written element has been acknowledged.
    pub async fn flush(&mut self) -> Result<()> {
        self.publisher.flush().await
    }

    pub fn publisher(&self) -> &FlushablePublisher {
        &self.publisher
    }
}

/// Sink for typed elements bound to one topic.
pub struct PubSubSink<T> {
    topic: TopicName,
    schema: Arc<dyn SerializationSchema<T>>,
    endpoint: Option<String>,
    bearer_token: Option<String>,
    transport_factory: Option<TransportFactory>,
}

impl<T> PubSubSink<T> {
    pub fn builder() -> PubSubSinkBuilder<T> {
        PubSubSinkBuilder::default()
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Create a writer backed by the shared publisher for this topic.
    pub async fn create_writer(&self) -> Result<PubSubSinkWriter<T>> {
        self.schema.open()?;

        let publisher = PublisherCache::global()
            .get_or_create(&self.topic, || async {
                let transport = match &self.transport_factory {
                    Some(factory) => factory()?,
                    None => Arc::new(RestTransport::new(
                        self.endpoint.as_deref(),
                        self.bearer_token.clone(),
                    )?) as Arc<dyn PublishTransport>,
                };
                Ok::<_, SinkError>(Publisher::new(self.topic.clone(), transport))
            })
            .await?;

        debug!(topic = %self.topic, "Created sink writer");
        Ok(PubSubSinkWriter::new(
            FlushablePublisher::new(publisher),
            Arc::clone(&self.schema),
        ))
    }
}

/// Builder for [`PubSubSink`]. Project, topic and schema are required.
pub struct PubSubSinkBuilder<T> {
    project: Option<String>,
    topic: Option<String>,
    schema: Option<Arc<dyn SerializationSchema<T>>>,
    endpoint: Option<String>,
    bearer_token: Option<String>,
    transport_factory: Option<TransportFactory>,
}

impl<T> Default for PubSubSinkBuilder<T> {
    fn default() -> Self {
        Self {
            project: None,
            topic: None,
            schema: None,
            endpoint: None,
            bearer_token: None,
            transport_factory: None,
        }
    }
}

impl<T> PubSubSinkBuilder<T> {
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn schema(mut self, schema: impl SerializationSchema<T> + 'static) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Replace the REST transport (useful for testing).
    pub fn transport(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<PubSubSink<T>> {
        let project = self
            .project
            .ok_or_else(|| SinkError::ConfigError("project name is required".to_string()))?;
        let topic = self
            .topic
            .ok_or_else(|| SinkError::ConfigError("topic name is required".to_string()))?;
        let schema = self
            .schema
            .ok_or_else(|| SinkError::ConfigError("serialization schema is required".to_string()))?;

        Ok(PubSubSink {
            topic: TopicName::new(project, topic)?,
            schema,
            endpoint: self.endpoint,
            bearer_token: self.bearer_token,
            transport_factory: self.transport_factory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PublishResponse;
    use async_trait::async_trait;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        published: Mutex<Vec<PubsubMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl PublishTransport for RecordingTransport {
        async fn publish(
            &self,
            topic: &TopicName,
            messages: &[PubsubMessage],
        ) -> Result<PublishResponse> {
            if self.fail {
                return Err(SinkError::TransportError {
                    topic: topic.path(),
                    messages: messages.len(),
                    reason: "NOT_FOUND".to_string(),
                });
            }
            self.published.lock().unwrap().extend_from_slice(messages);
            Ok(PublishResponse {
                message_ids: vec!["1".to_string(); messages.len()],
            })
        }
    }

    #[derive(Serialize)]
    struct Order {
        id: u32,
        item: String,
    }

    fn factory_for(transport: Arc<RecordingTransport>, built: Arc<AtomicUsize>) -> TransportFactory {
        Arc::new(move || {
            built.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SinkError>(transport.clone() as Arc<dyn PublishTransport>)
        })
    }

    // ---------------------------------------------------------------
    // Schemas
    // ---------------------------------------------------------------

    #[test]
    fn test_bytes_schema_is_identity() {
        let message = BytesSchema.serialize(&Bytes::from_static(b"\x00\x01")).unwrap();
        assert_eq!(message.data(), &Bytes::from_static(b"\x00\x01"));
        assert!(message.attributes().is_empty());
    }

    #[test]
    fn test_json_schema_encodes_element() {
        let schema = JsonSchema::<Order>::new();
        let message = schema
            .serialize(&Order {
                id: 7,
                item: "widget".to_string(),
            })
            .unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(message.data()).unwrap();
        assert_eq!(decoded["id"], 7);
        assert_eq!(decoded["item"], "widget");
    }

    // ---------------------------------------------------------------
    // Builder
    // ---------------------------------------------------------------

    #[test]
    fn test_builder_requires_fields() {
        let missing_topic = PubSubSink::<Bytes>::builder()
            .project("p")
            .schema(BytesSchema)
            .build();
        assert!(matches!(missing_topic, Err(SinkError::ConfigError(_))));

        let missing_schema = PubSubSink::<Bytes>::builder().project("p").topic("t").build();
        assert!(matches!(missing_schema, Err(SinkError::ConfigError(_))));
    }

    #[test]
    fn test_builder_builds_topic_path() {
        let sink = PubSubSink::<Bytes>::builder()
            .project("p")
            .topic("t")
            .schema(BytesSchema)
            .endpoint("emulator:///localhost:8085")
            .build()
            .unwrap();
        assert_eq!(sink.topic().path(), "projects/p/topics/t");
    }

    // ---------------------------------------------------------------
    // Writers
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_writers_share_cached_publisher() {
        let transport = Arc::new(RecordingTransport::default());
        let built = Arc::new(AtomicUsize::new(0));
        let sink = PubSubSink::<Bytes>::builder()
            .project("writer-tests")
            .topic("shared-publisher")
            .schema(BytesSchema)
            .transport(factory_for(transport.clone(), built.clone()))
            .build()
            .unwrap();

        let mut first = sink.create_writer().await.unwrap();
        let mut second = sink.create_writer().await.unwrap();
        assert!(Arc::ptr_eq(first.publisher().publisher(), second.publisher().publisher()));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        first.write(&Bytes::from("a")).unwrap();
        second.write(&Bytes::from("b")).unwrap();
        first.flush().await.unwrap();
        second.flush().await.unwrap();

        let mut published: Vec<Bytes> = transport
            .published
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.data().clone())
            .collect();
        published.sort();
        assert_eq!(published, vec![Bytes::from("a"), Bytes::from("b")]);
    }

    #[tokio::test]
    async fn test_flush_waits_for_all_writes() {
        let transport = Arc::new(RecordingTransport::default());
        let sink = PubSubSink::<Order>::builder()
            .project("writer-tests")
            .topic("json-orders")
            .schema(JsonSchema::new())
            .transport(factory_for(transport.clone(), Arc::new(AtomicUsize::new(0))))
            .build()
            .unwrap();

        let mut writer = sink.create_writer().await.unwrap();
        for id in 0..20 {
            writer
                .write(&Order {
                    id,
                    item: format!("item-{}", id),
                })
                .unwrap();
        }
        writer.flush().await.unwrap();

        assert_eq!(writer.publisher().outstanding(), 0);
        assert_eq!(transport.published.lock().unwrap().len(), 20);
    }

    #[tokio::test]
    async fn test_flush_surfaces_publish_failure() {
        let transport = Arc::new(RecordingTransport {
            fail: true,
            ..Default::default()
        });
        let sink = PubSubSink::<Bytes>::builder()
            .project("writer-tests")
            .topic("missing-topic")
            .schema(BytesSchema)
            .transport(factory_for(transport, Arc::new(AtomicUsize::new(0))))
            .build()
            .unwrap();

        let mut writer = sink.create_writer().await.unwrap();
        writer.write(&Bytes::from("x")).unwrap();
        let err = writer.flush().await.unwrap_err();
        assert!(err.to_string().contains("NOT_FOUND"));
    }
}
