//! Cache storage backends.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use tokio::time::Instant;

use crate::Result;

/// Key-value storage for rendered snapshots.
///
/// Implementations own eviction: reads of an entry older than the store's
/// max age behave as if the entry were absent, and inserting past capacity
/// drops the least recently touched entry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads an entry and marks it as recently used.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    async fn set(&self, key: &str, content: Bytes) -> Result<()>;

    /// Presence check that does not affect recency.
    async fn has(&self, key: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Live keys, most recently used first.
    async fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Entry {
    content: Bytes,
    inserted: Instant,
}

/// In-process LRU store with a max-age bound.
pub struct MemoryStore {
    entries: Mutex<LruCache<String, Entry>>,
    max_age: Duration,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize, max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) >= self.max_age
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired = match entries.peek(key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            entries.pop(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.content.clone()))
    }

    async fn set(&self, key: &str, content: Bytes) -> Result<()> {
        let entry = Entry {
            content,
            inserted: Instant::now(),
        };
        if let Some((evicted, _)) = self.lock().push(key.to_string(), entry) {
            if evicted != key {
                tracing::debug!(key = %evicted, "evicted least recently used cache entry");
            }
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .lock()
            .peek(key)
            .is_some_and(|entry| !self.is_expired(entry, now)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().pop(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.lock();
        let stale: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        Ok(entries.iter().map(|(key, _)| key.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: usize, max_age: Duration) -> MemoryStore {
        MemoryStore::new(NonZeroUsize::new(capacity).unwrap(), max_age)
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_max_age() {
        let store = store(4, Duration::from_secs(60));
        store.set("a", Bytes::from_static(b"<p>a</p>")).await.unwrap();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(store.has("a").await.unwrap());
        assert_eq!(
            store.get("a").await.unwrap(),
            Some(Bytes::from_static(b"<p>a</p>"))
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.has("a").await.unwrap());
        assert_eq!(store.get("a").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn capacity_evicts_least_recently_touched() {
        let store = store(2, Duration::from_secs(3600));
        store.set("a", Bytes::from_static(b"a")).await.unwrap();
        store.set("b", Bytes::from_static(b"b")).await.unwrap();

        // Touch "a" so "b" becomes the eviction candidate.
        store.get("a").await.unwrap();
        store.set("c", Bytes::from_static(b"c")).await.unwrap();

        assert!(store.has("a").await.unwrap());
        assert!(!store.has("b").await.unwrap());
        assert!(store.has("c").await.unwrap());
    }

    #[tokio::test]
    async fn has_does_not_refresh_recency() {
        let store = store(2, Duration::from_secs(3600));
        store.set("a", Bytes::from_static(b"a")).await.unwrap();
        store.set("b", Bytes::from_static(b"b")).await.unwrap();

        assert!(store.has("a").await.unwrap());
        store.set("c", Bytes::from_static(b"c")).await.unwrap();

        assert!(!store.has("a").await.unwrap());
        assert!(store.has("b").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn keys_purge_expired_entries() {
        let store = store(8, Duration::from_secs(10));
        store.set("old", Bytes::from_static(b"old")).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        store.set("new", Bytes::from_static(b"new")).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.keys().await.unwrap(), vec!["new".to_string()]);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = store(2, Duration::from_secs(3600));
        store.set("a", Bytes::from_static(b"a")).await.unwrap();
        store.delete("a").await.unwrap();
        store.delete("missing").await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }
}
