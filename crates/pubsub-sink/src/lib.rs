//! Pub/Sub Sink
//!
//! Batches records from many source partitions and publishes them to a
//! Google Cloud Pub/Sub topic through a pool of concurrent publishers, with
//! a `flush()` barrier that returns only once every accepted record has been
//! acknowledged.
//!
//! ## Architecture
//!
//! - **Buffer**: `PartitionBuffer` accumulates messages per (topic, partition)
//!   and decides when a batch must leave.
//! - **Dispatcher**: `BatchingDispatcher` owns the buffers, splits batches into
//!   request-sized chunks and tracks in-flight publishes.
//! - **Pool**: `PublisherPool` spreads requests round-robin over publishers.
//! - **Cache**: `PublisherCache` shares one publisher per topic across writers.
//! - **Transport**: `PublishTransport` is the network seam; `RestTransport`
//!   speaks the Pub/Sub JSON API and the emulator.
//! - **Sinks**: `PubSubSinkTask` implements `SinkConnector` on top of the
//!   dispatcher; `PubSubSink` creates typed writers.
//! - **Runtime**: `ConnectorRuntime` drives sink connectors as background tasks.

pub mod buffer;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod emulator;
pub mod error;
pub mod message;
pub mod pool;
pub mod publisher;
pub mod runtime;
pub mod sinks;
pub mod traits;
pub mod transport;
pub mod writer;

// Re-export key types at crate root for convenience.
pub use buffer::{BatchPolicy, PartitionBuffer, PartitionKey};
pub use cache::PublisherCache;
pub use config::{ConnectorConfig, ConnectorState};
pub use dispatcher::{BatchingDispatcher, DispatcherStats};
pub use error::{Result, SinkError};
pub use message::{PendingMessage, PubsubMessage, TopicName};
pub use pool::{DispatchRequest, DispatchTicket, PublisherPool};
pub use publisher::Publisher;
pub use runtime::{ConnectorRuntime, RecordSourceFn, RuntimeOptions};
pub use sinks::{PubSubSinkTask, SinkConfig};
pub use traits::{SchemaKind, SinkConnector, SinkRecord, ValueSchema};
pub use transport::{PublishResponse, PublishTransport, RestTransport};
pub use writer::{
    BytesSchema, FlushablePublisher, JsonSchema, PubSubSink, PubSubSinkWriter,
    SerializationSchema,
};
