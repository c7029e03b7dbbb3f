//! Thread harvesting: a root item's direct replies.
//!
//! [`Harvester::open`] fetches the root and returns a [`Thread`], a lazy,
//! finite cursor over the root's `kids` in their original order. Opening the
//! same root again starts a fresh pass. Replies without text are skipped and
//! replies that fail to fetch are counted; neither stops the thread.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{FetchError, HarvestError};
use crate::fetcher::ItemSource;
use crate::models::{ItemId, RawItem};
use crate::retry::{CircuitBreaker, RetryPolicy};

/// What happened to one reply ID.
#[derive(Debug)]
pub enum ReplyOutcome {
    /// Fetched and has body text.
    Comment(RawItem),
    /// Fetched but deleted, dead, or blank.
    Empty(ItemId),
    Failed(ItemId, FetchError),
}

/// Counters for one pass over a thread.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HarvestStats {
    pub replies: usize,
    pub comments: usize,
    pub skipped_empty: usize,
    pub fetch_failures: usize,
}

impl HarvestStats {
    pub fn record(&mut self, outcome: &ReplyOutcome) {
        self.replies += 1;
        match outcome {
            ReplyOutcome::Comment(_) => self.comments += 1,
            ReplyOutcome::Empty(_) => self.skipped_empty += 1,
            ReplyOutcome::Failed(..) => self.fetch_failures += 1,
        }
    }
}

/// Fetches thread roots and replies through a retrying, breaker-guarded
/// [`ItemSource`]. Cheap to clone; clones share the breaker.
#[derive(Clone)]
pub struct Harvester {
    source: Arc<dyn ItemSource>,
    retry: RetryPolicy,
    breaker: Arc<CircuitBreaker>,
}

impl Harvester {
    pub fn new(source: Arc<dyn ItemSource>, retry: RetryPolicy, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            source,
            retry,
            breaker,
        }
    }

    async fn fetch(&self, id: ItemId) -> Result<RawItem, FetchError> {
        let source = &*self.source;
        self.retry
            .run(&self.breaker, || FetchError::CircuitOpen(id), move || {
                source.fetch_item(id)
            })
            .await
    }

    /// Fetch the root item and start a pass over its replies.
    pub async fn open(&self, root_id: ItemId) -> Result<Thread, HarvestError> {
        let root = self
            .fetch(root_id)
            .await
            .map_err(|source| HarvestError::PartitionRootUnavailable { root_id, source })?;

        debug!(root_id, replies = root.kids.len(), "opened thread");

        Ok(Thread {
            harvester: self.clone(),
            root,
            position: 0,
            stats: HarvestStats::default(),
        })
    }

    /// Fetch and classify a single reply.
    pub async fn fetch_reply(&self, id: ItemId) -> ReplyOutcome {
        match self.fetch(id).await {
            Ok(item) if item.deleted || item.dead || item.body().is_none() => {
                debug!(id, "skipping reply without text");
                ReplyOutcome::Empty(id)
            }
            Ok(item) => ReplyOutcome::Comment(item),
            Err(e) => {
                warn!(id, "failed to fetch reply: {}", e);
                ReplyOutcome::Failed(id, e)
            }
        }
    }
}

/// One pass over a root item's direct replies.
pub struct Thread {
    harvester: Harvester,
    root: RawItem,
    position: usize,
    stats: HarvestStats,
}

impl Thread {
    pub fn root(&self) -> &RawItem {
        &self.root
    }

    /// Reply IDs in thread order.
    pub fn reply_ids(&self) -> &[ItemId] {
        &self.root.kids
    }

    /// Only visit the first `max` replies.
    pub fn limit(mut self, max: usize) -> Self {
        self.root.kids.truncate(max);
        self
    }

    pub fn stats(&self) -> HarvestStats {
        self.stats
    }

    /// Advance to the next reply that has text. `None` once every reply has
    /// been visited.
    pub async fn next_comment(&mut self) -> Option<RawItem> {
        while let Some(&id) = self.root.kids.get(self.position) {
            self.position += 1;
            let outcome = self.harvester.fetch_reply(id).await;
            self.stats.record(&outcome);
            if let ReplyOutcome::Comment(item) = outcome {
                return Some(item);
            }
        }
        None
    }
}
