//! Round-robin publisher pool.
//!
//! A task owns a fixed set of [`Publisher`] handles, each with its own
//! connection, and spreads publish requests across them so concurrent
//! flushes do not queue behind a single client.
//!
//! ## Dispatch
//!
//! `dispatch` never waits on the network. It picks the next handle, spawns
//! the publish on the tokio runtime and returns a [`DispatchTicket`]. The
//! ticket resolves to `Ok(())` once the request is acknowledged, or to a
//! [`SinkError::TransportError`] naming the destination and batch size.
//! Callers must inspect tickets: a failed publish is fatal for the task.
//!
//! ## Thread Safety
//!
//! `PublisherPool` is Send + Sync. The round-robin counter is a single
//! atomic, so a pool can be shared via `Arc` between dispatchers.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::error::{Result, SinkError};
use crate::message::{PubsubMessage, TopicName};
use crate::publisher::Publisher;
use crate::transport::PublishTransport;

/// An ordered batch of messages bound for one destination.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    topic: TopicName,
    messages: Vec<PubsubMessage>,
}

impl DispatchRequest {
    pub fn new(topic: TopicName, messages: Vec<PubsubMessage>) -> Self {
        Self { topic, messages }
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn messages(&self) -> &[PubsubMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Completion handle for one dispatched request.
#[derive(Debug)]
pub struct DispatchTicket {
    handle_index: usize,
    join: JoinHandle<Result<()>>,
}

impl DispatchTicket {
    /// Index of the pool handle the request was assigned to.
    pub fn handle_index(&self) -> usize {
        self.handle_index
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Outcome of a finished request, without waiting.
    ///
    /// Returns `None` while the request is still running.
    pub fn try_outcome(&mut self) -> Option<Result<()>> {
        if !self.join.is_finished() {
            return None;
        }
        (&mut self.join).now_or_never().map(flatten_join)
    }

    /// Wait for the request to complete.
    pub async fn wait(self) -> Result<()> {
        flatten_join(self.join.await)
    }
}

fn flatten_join(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| SinkError::RuntimeError(format!("publish task failed: {}", e)))?
}

/// Fixed-size set of publisher handles selected round-robin.
#[derive(Debug)]
pub struct PublisherPool {
    publishers: Vec<Arc<Publisher>>,
    next: AtomicUsize,
}

impl PublisherPool {
    /// Create a pool over existing handles.
    pub fn new(publishers: Vec<Arc<Publisher>>) -> Result<Self> {
        if publishers.is_empty() {
            return Err(SinkError::ConfigError(
                "publisher pool size must be positive".to_string(),
            ));
        }
        Ok(Self {
            publishers,
            next: AtomicUsize::new(0),
        })
    }

    /// Open `size` independent handles to `topic`, one transport each.
    pub async fn connect<F, Fut>(topic: &TopicName, size: usize, factory: F) -> Result<Self>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<dyn PublishTransport>>>,
    {
        let mut publishers = Vec::with_capacity(size);
        for _ in 0..size {
            let transport = factory().await?;
            publishers.push(Arc::new(Publisher::new(topic.clone(), transport)));
        }
        debug!(topic = %topic, size = size, "Opened publisher pool");
        Self::new(publishers)
    }

    pub fn size(&self) -> usize {
        self.publishers.len()
    }

    /// Publish calls currently outstanding across all handles.
    pub fn in_flight(&self) -> usize {
        self.publishers.iter().map(|p| p.in_flight()).sum()
    }

    /// Advance the round-robin counter and return the selected handle index.
    pub fn next_index(&self) -> usize {
        self.next.fetch_add(1, Ordering::Relaxed) % self.publishers.len()
    }

    /// Issue `request` on the next handle without waiting for the reply.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, request: DispatchRequest) -> DispatchTicket {
        let handle_index = self.next_index();
        let publisher = Arc::clone(&self.publishers[handle_index]);

        let join = tokio::spawn(async move {
            let messages = request.len();
            match publisher.publish(request.messages()).await {
                Ok(_) => {
                    debug!(
                        topic = %request.topic(),
                        handle = handle_index,
                        messages = messages,
                        "Published batch"
                    );
                    Ok(())
                }
                Err(e) => {
                    error!(
                        topic = %request.topic(),
                        handle = handle_index,
                        messages = messages,
                        error = %e,
                        "Failed to publish batch"
                    );
                    Err(match e {
                        e @ SinkError::TransportError { .. } => e,
                        other => SinkError::TransportError {
                            topic: request.topic().path(),
                            messages,
                            reason: other.to_string(),
                        },
                    })
                }
            }
        });

        DispatchTicket { handle_index, join }
    }
}
