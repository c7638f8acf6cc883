//! Bounded, partitioned message history
//!
//! History is partitioned by key fingerprint. The empty-fingerprint
//! partition ("public") is permanent; every other partition is created
//! lazily on the first message carrying its fingerprint and competes for a
//! fixed number of slots. When the slots run out, the partition whose last
//! append is oldest is deleted in its entirety before the new one is
//! created. Within a partition, history is a FIFO window: once full, the
//! oldest message leaves on every append.
//!
//! Eviction candidates are scored purely by the recency of their last
//! append, never by creation time - a partition that has never seen an
//! append carries activity 0 and is always the first to go.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use veil_common::protocol::ChatMessage;

/// One fingerprint's history window
#[derive(Debug, Default)]
struct Bucket {
    messages: VecDeque<ChatMessage>,
    /// Timestamp of the most recent append (0 until the first one lands)
    last_activity: u64,
}

/// Store state: the permanent public partition plus fingerprint partitions
#[derive(Debug, Default)]
struct StoreInner {
    public: VecDeque<ChatMessage>,
    buckets: HashMap<String, Bucket>,
}

/// Bounded message history with LRU partition eviction
///
/// Append and snapshot serialize on one lock, so a snapshot can never
/// observe a half-evicted partition set. A limit of 0 means unlimited for
/// that bound.
#[derive(Debug, Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<StoreInner>>,
    /// Maximum messages retained per partition (0 = unlimited)
    max_bucket_size: usize,
    /// Maximum concurrent non-public partitions (0 = unlimited)
    max_buckets: usize,
}

impl MessageStore {
    /// Create an empty store with the given bounds
    #[must_use]
    pub fn new(max_bucket_size: usize, max_buckets: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            max_bucket_size,
            max_buckets,
        }
    }

    /// Append a finalized message to its partition
    ///
    /// Routes by the message's key fingerprint: empty goes to the public
    /// partition, anything else to its own partition, creating it (and
    /// evicting the least-recently-active one if at capacity) as needed.
    pub async fn append(&self, message: ChatMessage) {
        let mut inner = self.inner.write().await;

        if message.key_fingerprint.is_empty() {
            inner.public.push_back(message);
            trim_front(&mut inner.public, self.max_bucket_size);
            return;
        }

        if !inner.buckets.contains_key(&message.key_fingerprint)
            && self.max_buckets > 0
            && inner.buckets.len() >= self.max_buckets
        {
            evict_least_recent(&mut inner.buckets);
        }

        let timestamp = message.timestamp;
        let bucket = inner
            .buckets
            .entry(message.key_fingerprint.clone())
            .or_default();
        bucket.messages.push_back(message);
        bucket.last_activity = timestamp;
        trim_front(&mut bucket.messages, self.max_bucket_size);
    }

    /// Get the merged history across all partitions
    ///
    /// Sorted ascending by timestamp. Ties keep a deterministic order (the
    /// sort is stable over public-then-fingerprint, fingerprints
    /// alphabetical) - not meaningful to clients, but reproducible.
    pub async fn snapshot(&self) -> Vec<ChatMessage> {
        let inner = self.inner.read().await;

        let mut fingerprints: Vec<&String> = inner.buckets.keys().collect();
        fingerprints.sort();

        let mut messages: Vec<ChatMessage> = inner.public.iter().cloned().collect();
        for fingerprint in fingerprints {
            messages.extend(inner.buckets[fingerprint].messages.iter().cloned());
        }
        messages.sort_by_key(|m| m.timestamp);
        messages
    }
}

/// Drop messages from the front until the window fits (0 = unlimited)
fn trim_front(messages: &mut VecDeque<ChatMessage>, max: usize) {
    if max == 0 {
        return;
    }
    while messages.len() > max {
        messages.pop_front();
    }
}

/// Delete the partition with the oldest last append, in its entirety
///
/// Ties break alphabetically by fingerprint so eviction is deterministic.
fn evict_least_recent(buckets: &mut HashMap<String, Bucket>) {
    let victim = buckets
        .iter()
        .min_by_key(|(fingerprint, bucket)| (bucket.last_activity, fingerprint.clone()))
        .map(|(fingerprint, _)| fingerprint.clone());
    if let Some(fingerprint) = victim {
        buckets.remove(&fingerprint);
    }
}
