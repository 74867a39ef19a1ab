//! Publisher handle: one transport bound to one destination topic.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::message::{PubsubMessage, TopicName};
use crate::transport::{PublishResponse, PublishTransport};

/// A network client bound to a single topic.
///
/// Shared behind `Arc`; `publish` only needs `&self`, so one handle can carry
/// several concurrent requests.
pub struct Publisher {
    topic: TopicName,
    transport: Arc<dyn PublishTransport>,
    in_flight: AtomicUsize,
}

impl Publisher {
    pub fn new(topic: TopicName, transport: Arc<dyn PublishTransport>) -> Self {
        Self {
            topic,
            transport,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    /// Number of publish calls currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Publish `messages` to this handle's topic.
    pub async fn publish(&self, messages: &[PubsubMessage]) -> Result<PublishResponse> {
        let _guard = InFlightGuard::enter(&self.in_flight);
        self.transport.publish(&self.topic, messages).await
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Keeps the in-flight count accurate even if the publish future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}
