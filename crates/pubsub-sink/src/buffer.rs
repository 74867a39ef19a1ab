//! Per-partition accumulation.
//!
//! Each (source topic, source partition) pair owns one [`PartitionBuffer`].
//! The buffer decides, message by message, when its contents must leave:
//!
//! ```text
//!   admit(msg)
//!      │
//!      ├─ pending + size > max_request_bytes ──→ flush what is buffered
//!      │
//!      ├─ append msg, pending += size
//!      │
//!      └─ len >= min_batch_size ───────────────→ flush everything
//! ```
//!
//! Flushed batches are returned to the caller in order; the buffer itself
//! never performs I/O.
//!
//! ## Thread Safety
//!
//! NOT thread-safe. A buffer is owned by exactly one dispatcher.

use tracing::{trace, warn};

use crate::error::{Result, SinkError};
use crate::message::{PendingMessage, PubsubMessage};

/// Largest publish request body accepted, leaving room for request overhead.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = (10 << 20) - 1024;

/// Largest number of messages in a single publish request.
pub const DEFAULT_MAX_MESSAGES_PER_REQUEST: usize = 1000;

/// Default number of buffered messages that triggers an eager flush.
pub const DEFAULT_MIN_BATCH_SIZE: usize = 1000;

/// Key identifying a source partition: (topic, partition).
pub type PartitionKey = (String, u32);

/// Thresholds applied to every partition buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Buffered message count at which the buffer is flushed immediately.
    pub min_batch_size: usize,
    /// Ceiling on the summed size of one flushed batch.
    pub max_request_bytes: usize,
    /// Ceiling on the message count of one publish request.
    pub max_messages_per_request: usize,
}

impl BatchPolicy {
    /// Build a policy, rejecting zero thresholds.
    pub fn new(
        min_batch_size: usize,
        max_request_bytes: usize,
        max_messages_per_request: usize,
    ) -> Result<Self> {
        for (label, value) in [
            ("min_batch_size", min_batch_size),
            ("max_request_bytes", max_request_bytes),
            ("max_messages_per_request", max_messages_per_request),
        ] {
            if value == 0 {
                return Err(SinkError::ConfigError(format!("{} must be positive", label)));
            }
        }
        Ok(Self {
            min_batch_size,
            max_request_bytes,
            max_messages_per_request,
        })
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            min_batch_size: DEFAULT_MIN_BATCH_SIZE,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            max_messages_per_request: DEFAULT_MAX_MESSAGES_PER_REQUEST,
        }
    }
}

/// Ordered messages awaiting dispatch for one source partition.
///
/// Invariant: `pending_bytes` equals the sum of `size_bytes` over the
/// buffered messages.
#[derive(Debug, Default)]
pub struct PartitionBuffer {
    messages: Vec<PendingMessage>,
    pending_bytes: usize,
}

impl PartitionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message, returning the batches that must be dispatched now.
    ///
    /// At most two batches come back, oldest first: the contents flushed to
    /// make room for `pending`, and the contents flushed because the buffer
    /// reached `min_batch_size`. The buffer is empty after any flush.
    pub fn admit(
        &mut self,
        pending: PendingMessage,
        policy: &BatchPolicy,
    ) -> Vec<Vec<PubsubMessage>> {
        let mut flushed = Vec::new();

        if self.pending_bytes + pending.size_bytes > policy.max_request_bytes {
            if pending.size_bytes > policy.max_request_bytes {
                warn!(
                    size_bytes = pending.size_bytes,
                    max_request_bytes = policy.max_request_bytes,
                    "Message exceeds request size ceiling, sending it alone"
                );
            }
            if !self.is_empty() {
                trace!(
                    pending_bytes = self.pending_bytes,
                    incoming = pending.size_bytes,
                    "Flushing before append: size ceiling"
                );
                flushed.push(self.take());
            }
        }

        self.pending_bytes += pending.size_bytes;
        self.messages.push(pending);

        if self.messages.len() >= policy.min_batch_size {
            trace!(
                record_count = self.messages.len(),
                min_batch_size = policy.min_batch_size,
                "Flushing after append: batch size"
            );
            flushed.push(self.take());
        }

        flushed
    }

    /// Remove and return every buffered message, resetting the byte tally.
    pub fn take(&mut self) -> Vec<PubsubMessage> {
        self.pending_bytes = 0;
        std::mem::take(&mut self.messages)
            .into_iter()
            .map(|pending| pending.message)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Bytes currently charged against the request ceiling.
    pub fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    #[cfg(test)]
    fn recomputed_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn sized(tag: u32, size_bytes: usize) -> PendingMessage {
        PendingMessage::new(
            PubsubMessage::from_data(Bytes::from(tag.to_be_bytes().to_vec())),
            size_bytes,
        )
    }

    fn tag_of(message: &PubsubMessage) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(message.data());
        u32::from_be_bytes(raw)
    }

    // ---------------------------------------------------------------
    // BatchPolicy
    // ---------------------------------------------------------------

    #[test]
    fn test_policy_defaults() {
        let policy = BatchPolicy::default();
        assert_eq!(policy.max_request_bytes, 10 * 1024 * 1024 - 1024);
        assert_eq!(policy.max_messages_per_request, 1000);
        assert_eq!(policy.min_batch_size, 1000);
    }

    #[test]
    fn test_policy_rejects_zero() {
        assert!(BatchPolicy::new(0, 100, 10).is_err());
        assert!(BatchPolicy::new(1, 0, 10).is_err());
        assert!(BatchPolicy::new(1, 100, 0).is_err());
        assert!(BatchPolicy::new(1, 100, 10).is_ok());
    }

    // ---------------------------------------------------------------
    // Admission
    // ---------------------------------------------------------------

    #[test]
    fn test_admit_below_thresholds_buffers() {
        let policy = BatchPolicy::new(2, 1000, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();

        assert!(buffer.admit(sized(1, 50), &policy).is_empty());
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pending_bytes(), 50);
    }

    #[test]
    fn test_admit_reaching_min_batch_flushes() {
        let policy = BatchPolicy::new(2, 1000, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();

        buffer.admit(sized(1, 50), &policy);
        let flushed = buffer.admit(sized(2, 50), &policy);

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].iter().map(tag_of).collect::<Vec<_>>(), vec![1, 2]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending_bytes(), 0);
    }

    #[test]
    fn test_admit_over_ceiling_flushes_first() {
        let policy = BatchPolicy::new(100, 100, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();

        assert!(buffer.admit(sized(1, 60), &policy).is_empty());
        let flushed = buffer.admit(sized(2, 50), &policy);

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].iter().map(tag_of).collect::<Vec<_>>(), vec![1]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pending_bytes(), 50);
    }

    #[test]
    fn test_admit_exactly_at_ceiling_does_not_flush() {
        let policy = BatchPolicy::new(100, 100, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();

        buffer.admit(sized(1, 60), &policy);
        assert!(buffer.admit(sized(2, 40), &policy).is_empty());
        assert_eq!(buffer.pending_bytes(), 100);
    }

    #[test]
    fn test_admit_can_flush_twice() {
        // Ceiling forces a flush of the old message, then min_batch_size = 1
        // flushes the new one as well.
        let policy = BatchPolicy::new(1, 100, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();
        buffer.messages.push(sized(1, 90));
        buffer.pending_bytes = 90;

        let flushed = buffer.admit(sized(2, 20), &policy);
        assert_eq!(flushed.len(), 2);
        assert_eq!(tag_of(&flushed[0][0]), 1);
        assert_eq!(tag_of(&flushed[1][0]), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_oversized_message_is_admitted_alone() {
        let policy = BatchPolicy::new(10, 100, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();

        // Empty buffer: nothing to flush, message still admitted.
        assert!(buffer.admit(sized(1, 500), &policy).is_empty());
        assert_eq!(buffer.pending_bytes(), 500);

        // Next message pushes the oversized one out on its own.
        let flushed = buffer.admit(sized(2, 10), &policy);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 1);
        assert_eq!(buffer.pending_bytes(), 10);
    }

    #[test]
    fn test_take_resets() {
        let policy = BatchPolicy::new(10, 1000, 1000).unwrap();
        let mut buffer = PartitionBuffer::new();
        buffer.admit(sized(1, 10), &policy);
        buffer.admit(sized(2, 10), &policy);

        let taken = buffer.take();
        assert_eq!(taken.len(), 2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending_bytes(), 0);
        assert!(buffer.take().is_empty());
    }

    // ---------------------------------------------------------------
    // Properties
    // ---------------------------------------------------------------

    proptest! {
        #[test]
        fn prop_ceiling_respected_and_order_preserved(
            sizes in prop::collection::vec(1usize..200, 1..200),
            min_batch_size in 1usize..50,
            max_request_bytes in 200usize..2000,
        ) {
            let policy = BatchPolicy::new(min_batch_size, max_request_bytes, 1000).unwrap();
            let mut buffer = PartitionBuffer::new();
            let mut emitted = Vec::new();

            for (i, size) in sizes.iter().enumerate() {
                for batch in buffer.admit(sized(i as u32, *size), &policy) {
                    let batch_bytes: usize = batch.iter().map(|m| sizes[tag_of(m) as usize]).sum();
                    prop_assert!(batch_bytes <= max_request_bytes);
                    prop_assert!(!batch.is_empty());
                    emitted.extend(batch.iter().map(tag_of));
                }
                prop_assert!(buffer.pending_bytes() <= max_request_bytes);
                prop_assert!(buffer.len() < min_batch_size);
                prop_assert_eq!(buffer.pending_bytes(), buffer.recomputed_bytes());
            }
            emitted.extend(buffer.take().iter().map(tag_of));

            let expected: Vec<u32> = (0..sizes.len() as u32).collect();
            prop_assert_eq!(emitted, expected);
        }
    }
}
