//! Batching dispatcher.
//!
//! Owns one [`PartitionBuffer`] per source partition and turns buffered
//! messages into publish requests on a shared [`PublisherPool`].
//!
//! ## Flow
//!
//! ```text
//!   submit(topic, partition, msg)
//!      │
//!      ├─ reap finished dispatches, return latched failure if any
//!      ├─ buffer = buffers[(topic, partition)]  (created on first use)
//!      └─ for batch in buffer.admit(msg)
//!             for chunk in batch.chunks(max_messages_per_request)
//!                 pool.dispatch(chunk) ──→ in_flight
//!
//!   drain()
//!      ├─ flush every non-empty buffer, clear the map
//!      └─ await every in-flight dispatch, return the first failure
//! ```
//!
//! ## Ordering
//!
//! Chunks are dispatched in arrival order, but chunks from one partition may
//! be in flight together and complete in any order. Order is guaranteed only
//! within a single request.
//!
//! ## Thread Safety
//!
//! NOT thread-safe. The host delivers records to one dispatcher at a time;
//! only the pool is shared.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error};

use crate::buffer::{BatchPolicy, PartitionBuffer, PartitionKey};
use crate::error::{Result, SinkError};
use crate::message::{PendingMessage, PubsubMessage, TopicName};
use crate::pool::{DispatchRequest, DispatchTicket, PublisherPool};

/// Snapshot of dispatcher occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub buffered_partitions: usize,
    pub buffered_messages: usize,
    pub buffered_bytes: usize,
    pub in_flight: usize,
}

/// Per-partition batching in front of a publisher pool.
pub struct BatchingDispatcher {
    topic: TopicName,
    policy: BatchPolicy,
    pool: Arc<PublisherPool>,
    buffers: HashMap<PartitionKey, PartitionBuffer>,
    in_flight: Vec<DispatchTicket>,
    failure: Option<SinkError>,
}

impl BatchingDispatcher {
    pub fn new(topic: TopicName, policy: BatchPolicy, pool: Arc<PublisherPool>) -> Self {
        Self {
            topic,
            policy,
            pool,
            buffers: HashMap::new(),
            in_flight: Vec::new(),
            failure: None,
        }
    }

    pub fn topic(&self) -> &TopicName {
        &self.topic
    }

    pub fn policy(&self) -> &BatchPolicy {
        &self.policy
    }

    /// Buffer one message for `(topic, partition)`, dispatching whatever the
    /// admission policy flushes.
    ///
    /// Never waits on the network. Fails if an earlier dispatch has failed.
    pub fn submit(&mut self, topic: &str, partition: u32, message: PendingMessage) -> Result<()> {
        self.reap()?;

        let key: PartitionKey = (topic.to_string(), partition);
        let flushed = self
            .buffers
            .entry(key)
            .or_default()
            .admit(message, &self.policy);

        for batch in flushed {
            self.flush_partition(topic, partition, batch);
        }
        Ok(())
    }

    /// Flush every buffer and wait for all outstanding dispatches.
    ///
    /// Returns `Ok` only when every request issued so far has been
    /// acknowledged. The buffer map is empty afterwards either way.
    pub async fn drain(&mut self) -> Result<()> {
        let buffers = std::mem::take(&mut self.buffers);
        for ((topic, partition), mut buffer) in buffers {
            if buffer.is_empty() {
                continue;
            }
            let batch = buffer.take();
            self.flush_partition(&topic, partition, batch);
        }

        let tickets = std::mem::take(&mut self.in_flight);
        debug!(
            topic = %self.topic,
            dispatches = tickets.len(),
            "Draining dispatches"
        );
        for ticket in tickets {
            if let Err(e) = ticket.wait().await {
                self.latch(e);
            }
        }

        self.latched()
    }

    /// Occupancy counters for logging and tests.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            buffered_partitions: self.buffers.values().filter(|b| !b.is_empty()).count(),
            buffered_messages: self.buffers.values().map(PartitionBuffer::len).sum(),
            buffered_bytes: self.buffers.values().map(PartitionBuffer::pending_bytes).sum(),
            in_flight: self.in_flight.len(),
        }
    }

    /// Split `messages` into count-bounded requests and dispatch them in order.
    fn flush_partition(&mut self, topic: &str, partition: u32, messages: Vec<PubsubMessage>) {
        if messages.is_empty() {
            return;
        }
        debug!(
            topic = topic,
            partition = partition,
            messages = messages.len(),
            "Flushing partition"
        );

        for request in self.split_requests(messages) {
            self.in_flight.push(self.pool.dispatch(request));
        }
    }

    /// Consecutive chunks of at most `max_messages_per_request`, in order.
    fn split_requests(&self, messages: Vec<PubsubMessage>) -> Vec<DispatchRequest> {
        let mut requests = Vec::new();
        let mut remaining = messages;
        while !remaining.is_empty() {
            let split = remaining.len().min(self.policy.max_messages_per_request);
            let rest = remaining.split_off(split);
            requests.push(DispatchRequest::new(self.topic.clone(), remaining));
            remaining = rest;
        }
        requests
    }

    /// Collect finished dispatches without waiting on the rest.
    fn reap(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        self.in_flight.retain_mut(|ticket| match ticket.try_outcome() {
            None => true,
            Some(Ok(())) => false,
            Some(Err(e)) => {
                failures.push(e);
                false
            }
        });
        for e in failures {
            self.latch(e);
        }

        self.latched()
    }

    /// The latched failure, repeated for every later caller.
    fn latched(&self) -> Result<()> {
        match &self.failure {
            None => Ok(()),
            Some(SinkError::TransportError {
                topic,
                messages,
                reason,
            }) => Err(SinkError::TransportError {
                topic: topic.clone(),
                messages: *messages,
                reason: reason.clone(),
            }),
            Some(other) => Err(SinkError::RuntimeError(other.to_string())),
        }
    }

    fn latch(&mut self, e: SinkError) {
        if self.failure.is_none() {
            error!(topic = %self.topic, error = %e, "Dispatch failed, halting dispatcher");
            self.failure = Some(e);
        }
    }
}

impl std::fmt::Debug for BatchingDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingDispatcher")
            .field("topic", &self.topic)
            .field("policy", &self.policy)
            .field("stats", &self.stats())
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
