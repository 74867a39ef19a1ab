//! Process-wide publisher registry.
//!
//! Writers targeting the same topic share one [`Publisher`]. Each key maps to
//! a `OnceCell`, so the first caller runs the factory while concurrent callers
//! for the same key wait on it; lookups for other keys are not blocked.
//! Entries are never evicted.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::sync::OnceCell;
use tracing::info;

use crate::error::Result;
use crate::message::TopicName;
use crate::publisher::Publisher;

static GLOBAL: Lazy<PublisherCache> = Lazy::new(PublisherCache::new);

/// Registry of shared publisher handles keyed by destination topic.
#[derive(Debug, Default)]
pub struct PublisherCache {
    entries: DashMap<TopicName, Arc<OnceCell<Arc<Publisher>>>>,
}

impl PublisherCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cache shared by every writer in the process.
    pub fn global() -> &'static PublisherCache {
        &GLOBAL
    }

    /// Return the handle for `key`, building it with `factory` on first use.
    ///
    /// At most one factory call succeeds per key. A failed factory leaves the
    /// key empty and the error goes to the caller that ran it.
    pub async fn get_or_create<F, Fut>(&self, key: &TopicName, factory: F) -> Result<Arc<Publisher>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Publisher>>,
    {
        // Clone the cell out so no map shard lock is held across the await.
        let cell = self
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let publisher = cell
            .get_or_try_init(|| async move {
                let publisher = factory().await?;
                info!(topic = %key, "Created shared publisher");
                Ok::<_, crate::error::SinkError>(Arc::new(publisher))
            })
            .await?;

        Ok(Arc::clone(publisher))
    }

    /// Number of keys with a constructed publisher.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
