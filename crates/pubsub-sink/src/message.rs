//! Pub/Sub message model and record conversion.
//!
//! A [`PubsubMessage`] is the unit sent to the publish API: opaque payload
//! bytes plus string attributes. Records coming from the host are converted
//! into a [`PendingMessage`], which carries the byte cost charged against the
//! request-size ceiling while the message sits in a partition buffer.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;

use crate::error::{Result, SinkError};
use crate::traits::SinkRecord;

/// Attribute carrying the source partition number.
pub const PARTITION_ATTRIBUTE: &str = "kafka.partition";
/// Attribute carrying the source topic name.
pub const KAFKA_TOPIC_ATTRIBUTE: &str = "kafka.topic";
/// Attribute carrying the record key, when present.
pub const KEY_ATTRIBUTE: &str = "key";

/// Fully qualified Pub/Sub topic, `projects/{project}/topics/{topic}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicName {
    project: String,
    topic: String,
}

impl TopicName {
    /// Build a topic name, rejecting empty or slash-containing components.
    pub fn new(project: impl Into<String>, topic: impl Into<String>) -> Result<Self> {
        let project = project.into();
        let topic = topic.into();
        for (label, value) in [("project", &project), ("topic", &topic)] {
            if value.is_empty() {
                return Err(SinkError::ConfigError(format!("{} name is empty", label)));
            }
            if value.contains('/') {
                return Err(SinkError::ConfigError(format!(
                    "{} name '{}' must not contain '/'",
                    label, value
                )));
            }
        }
        Ok(Self { project, topic })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Resource path used by the publish API.
    pub fn path(&self) -> String {
        format!("projects/{}/topics/{}", self.project, self.topic)
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project, self.topic)
    }
}

/// A message ready to be published. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PubsubMessage {
    data: Bytes,
    attributes: BTreeMap<String, String>,
}

impl PubsubMessage {
    pub fn new(data: impl Into<Bytes>, attributes: BTreeMap<String, String>) -> Self {
        Self {
            data: data.into(),
            attributes,
        }
    }

    /// A message with a payload and no attributes.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self::new(data, BTreeMap::new())
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// A message together with the bytes it counts against the request ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub message: PubsubMessage,
    pub size_bytes: usize,
}

impl PendingMessage {
    pub fn new(message: PubsubMessage, size_bytes: usize) -> Self {
        Self {
            message,
            size_bytes,
        }
    }

    /// Validate a host record and convert it into a sized message.
    ///
    /// The payload must be declared as a byte string. Source partition and
    /// topic are carried as attributes, plus the key when present. The size
    /// charged is the payload length plus the length of every attribute name
    /// and value; key characters are charged two bytes each, the upper bound
    /// for a UTF-16 code unit.
    pub fn from_record(record: &SinkRecord) -> Result<Self> {
        if !record.value_schema.is_byte_string() {
            return Err(SinkError::MalformedRecord(format!(
                "unexpected record of type {} at {}/{}@{}",
                record.value_schema, record.topic, record.partition, record.offset
            )));
        }

        let partition = record.partition.to_string();
        let mut size_bytes = record.value.len()
            + PARTITION_ATTRIBUTE.len()
            + partition.len()
            + KAFKA_TOPIC_ATTRIBUTE.len()
            + record.topic.len();

        let mut attributes = BTreeMap::new();
        attributes.insert(PARTITION_ATTRIBUTE.to_string(), partition);
        attributes.insert(KAFKA_TOPIC_ATTRIBUTE.to_string(), record.topic.clone());

        if let Some(key) = &record.key {
            let key = String::from_utf8_lossy(key).into_owned();
            size_bytes += KEY_ATTRIBUTE.len() + 2 * key.encode_utf16().count();
            attributes.insert(KEY_ATTRIBUTE.to_string(), key);
        }

        Ok(Self::new(
            PubsubMessage::new(record.value.clone(), attributes),
            size_bytes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::{SchemaKind, ValueSchema};

    // ---------------------------------------------------------------
    // TopicName
    // ---------------------------------------------------------------

    #[test]
    fn test_topic_name_path() {
        let name = TopicName::new("my-project", "events").unwrap();
        assert_eq!(name.path(), "projects/my-project/topics/events");
        assert_eq!(name.to_string(), name.path());
        assert_eq!(name.project(), "my-project");
        assert_eq!(name.topic(), "events");
    }

    #[test]
    fn test_topic_name_rejects_empty() {
        assert!(TopicName::new("", "events").is_err());
        assert!(TopicName::new("p", "").is_err());
    }

    #[test]
    fn test_topic_name_rejects_slash() {
        let err = TopicName::new("p", "a/b").unwrap_err();
        assert!(err.to_string().contains("a/b"));
    }

    // ---------------------------------------------------------------
    // Record conversion
    // ---------------------------------------------------------------

    #[test]
    fn test_from_record_without_key() {
        let record = SinkRecord::new("orders", 12, 7, Bytes::from("hello"));
        let pending = PendingMessage::from_record(&record).unwrap();

        assert_eq!(pending.message.data(), &Bytes::from("hello"));
        assert_eq!(pending.message.attribute(PARTITION_ATTRIBUTE), Some("12"));
        assert_eq!(pending.message.attribute(KAFKA_TOPIC_ATTRIBUTE), Some("orders"));
        assert_eq!(pending.message.attribute(KEY_ATTRIBUTE), None);

        // 5 + "kafka.partition"(15) + "12"(2) + "kafka.topic"(11) + "orders"(6)
        assert_eq!(pending.size_bytes, 39);
    }

    #[test]
    fn test_from_record_with_key_charges_two_bytes_per_char() {
        let record = SinkRecord::new("t", 0, 0, Bytes::from("v")).with_key("abc");
        let pending = PendingMessage::from_record(&record).unwrap();

        assert_eq!(pending.message.attribute(KEY_ATTRIBUTE), Some("abc"));
        // 1 + 15 + 1 + 11 + 1 = 29, plus "key"(3) + 2 * 3
        assert_eq!(pending.size_bytes, 29 + 3 + 6);
    }

    #[test]
    fn test_from_record_key_counts_utf16_units() {
        // 'é' is one UTF-16 unit, '😀' is two.
        let record = SinkRecord::new("t", 0, 0, Bytes::new()).with_key("é😀");
        let pending = PendingMessage::from_record(&record).unwrap();
        assert_eq!(pending.size_bytes, 28 + 3 + 2 * 3);
    }

    #[test]
    fn test_from_record_rejects_non_bytes_schema() {
        let record = SinkRecord::new("orders", 1, 99, Bytes::from("{}")).with_schema(ValueSchema {
            kind: SchemaKind::Struct,
            name: None,
        });
        let err = PendingMessage::from_record(&record).unwrap_err();
        assert!(matches!(err, SinkError::MalformedRecord(_)));
        assert!(err.to_string().contains("orders/1@99"));
    }

    #[test]
    fn test_message_is_cheap_to_clone() {
        let msg = PubsubMessage::from_data(Bytes::from(vec![0u8; 1024]));
        let cloned = msg.clone();
        assert_eq!(msg.data().as_ptr(), cloned.data().as_ptr());
    }
}
