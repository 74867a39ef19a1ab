//! Connector traits and the record type delivered by the host.
//!
//! `SinkConnector` is the lifecycle interface the [`ConnectorRuntime`] drives;
//! `SinkRecord` is what the host hands to `put`.
//!
//! [`ConnectorRuntime`]: crate::runtime::ConnectorRuntime

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Schema name the host attaches to raw byte-string payloads.
pub const BYTE_STRING_SCHEMA_NAME: &str = "com.google.protobuf.ByteString";

/// Logical type of a record value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    Bytes,
    String,
    Int64,
    Float64,
    Boolean,
    Struct,
    Map,
    Array,
}

/// Schema describing a record value, as declared by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSchema {
    pub kind: SchemaKind,
    pub name: Option<String>,
}

impl ValueSchema {
    /// Unnamed raw bytes.
    pub fn bytes() -> Self {
        Self {
            kind: SchemaKind::Bytes,
            name: None,
        }
    }

    /// Raw bytes tagged with the byte-string schema name.
    pub fn byte_string() -> Self {
        Self {
            kind: SchemaKind::Bytes,
            name: Some(BYTE_STRING_SCHEMA_NAME.to_string()),
        }
    }

    /// Whether a value with this schema can be published as-is.
    pub fn is_byte_string(&self) -> bool {
        self.kind == SchemaKind::Bytes
            && self
                .name
                .as_deref()
                .map_or(true, |name| name == BYTE_STRING_SCHEMA_NAME)
    }
}

impl std::fmt::Display for ValueSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{:?}({})", self.kind, name),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

/// A record delivered to a sink connector for publishing.
#[derive(Debug, Clone)]
pub struct SinkRecord {
    /// Topic the record was consumed from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Timestamp in milliseconds since epoch.
    pub timestamp: u64,
    /// Optional record key.
    pub key: Option<Bytes>,
    /// Record value (payload).
    pub value: Bytes,
    /// Declared schema of `value`.
    pub value_schema: ValueSchema,
}

impl SinkRecord {
    /// Build a byte-string record with no key.
    pub fn new(topic: impl Into<String>, partition: u32, offset: u64, value: Bytes) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            timestamp: 0,
            key: None,
            value,
            value_schema: ValueSchema::byte_string(),
        }
    }

    /// Attach a key.
    pub fn with_key(mut self, key: impl Into<Bytes>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Override the declared value schema.
    pub fn with_schema(mut self, schema: ValueSchema) -> Self {
        self.value_schema = schema;
        self
    }
}

/// Trait that all sink connectors must implement.
///
/// A sink connector receives records from the host and writes them to an
/// external system. `flush` is the commit barrier: when it returns `Ok`, every
/// record passed to `put` before it has been handed off durably.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Initialize the connector and establish connections.
    async fn start(&mut self) -> Result<()>;

    /// Accept a batch of records for writing.
    ///
    /// Implementations may buffer records internally and defer the actual
    /// write until [`flush`](SinkConnector::flush) is called.
    async fn put(&mut self, records: &[SinkRecord]) -> Result<()>;

    /// Flush any buffered records to the external system.
    async fn flush(&mut self) -> Result<()>;

    /// Gracefully shut down the connector, flushing remaining data.
    async fn stop(&mut self) -> Result<()>;

    /// Return the unique name of this connector instance.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // ValueSchema
    // ---------------------------------------------------------------

    #[test]
    fn test_byte_string_schema_accepted() {
        assert!(ValueSchema::byte_string().is_byte_string());
        assert!(ValueSchema::bytes().is_byte_string());
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let schema = ValueSchema {
            kind: SchemaKind::Struct,
            name: None,
        };
        assert!(!schema.is_byte_string());
    }

    #[test]
    fn test_wrong_name_rejected() {
        let schema = ValueSchema {
            kind: SchemaKind::Bytes,
            name: Some("org.apache.kafka.connect.data.Decimal".to_string()),
        };
        assert!(!schema.is_byte_string());
    }

    #[test]
    fn test_schema_display() {
        assert_eq!(ValueSchema::bytes().to_string(), "Bytes");
        assert_eq!(
            ValueSchema::byte_string().to_string(),
            "Bytes(com.google.protobuf.ByteString)"
        );
    }

    // ---------------------------------------------------------------
    // SinkRecord
    // ---------------------------------------------------------------

    #[test]
    fn test_sink_record_builder() {
        let rec = SinkRecord::new("events", 2, 42, Bytes::from("payload")).with_key("user-1");
        assert_eq!(rec.topic, "events");
        assert_eq!(rec.partition, 2);
        assert_eq!(rec.offset, 42);
        assert_eq!(rec.key, Some(Bytes::from("user-1")));
        assert!(rec.value_schema.is_byte_string());
    }

    // ---------------------------------------------------------------
    // Trait object safety
    // ---------------------------------------------------------------

    struct MockSink;

    #[async_trait]
    impl SinkConnector for MockSink {
        async fn start(&mut self) -> Result<()> {
            Ok(())
        }
        async fn put(&mut self, _records: &[SinkRecord]) -> Result<()> {
            Ok(())
        }
        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }
        async fn stop(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock-sink"
        }
    }

    #[test]
    fn test_sink_connector_object_safety() {
        let sink = MockSink;
        let _: &dyn SinkConnector = &sink;
    }

    #[tokio::test]
    async fn test_mock_sink_lifecycle() {
        let mut sink: Box<dyn SinkConnector> = Box::new(MockSink);
        sink.start().await.unwrap();
        sink.put(&[SinkRecord::new("t", 0, 0, Bytes::from("x"))])
            .await
            .unwrap();
        sink.flush().await.unwrap();
        sink.stop().await.unwrap();
        assert_eq!(sink.name(), "mock-sink");
    }
}
