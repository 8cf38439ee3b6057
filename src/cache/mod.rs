//! Snapshot cache.
//!
//! # Module Structure
//!
//! - [`store`] - The [`CacheStore`] contract and the in-process [`MemoryStore`]
//! - [`redis`] - [`RedisStore`], shared between gateway instances and restarts
//! - [`CacheLayer`] - When the gateway reads, writes, and invalidates entries
//!
//! The layer treats the store as an optimization: store failures are logged
//! and degrade to a miss or a skipped write instead of failing the request.

pub mod redis;
mod store;

pub use self::redis::RedisStore;
pub use store::{CacheStore, MemoryStore};

use std::sync::Arc;

use bytes::Bytes;
use tracing::warn;

use crate::target::NormalizedUrl;

#[derive(Clone)]
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub async fn lookup(&self, key: &NormalizedUrl) -> Option<Bytes> {
        match self.store.get(key.as_str()).await {
            Ok(hit) => hit,
            Err(err) => {
                warn!(url = %key, error = %err, "cache read failed; treating as miss");
                None
            }
        }
    }

    /// Stores a freshly rendered snapshot unless an entry already exists.
    ///
    /// Returns `true` when this call wrote the entry.
    pub async fn populate(&self, key: &NormalizedUrl, content: Bytes) -> bool {
        match self.store.has(key.as_str()).await {
            Ok(true) => return false,
            Ok(false) => {}
            Err(err) => {
                warn!(url = %key, error = %err, "cache presence check failed; skipping write");
                return false;
            }
        }
        match self.store.set(key.as_str(), content).await {
            Ok(()) => true,
            Err(err) => {
                warn!(url = %key, error = %err, "cache write failed");
                false
            }
        }
    }

    pub async fn invalidate(&self, key: &NormalizedUrl) {
        if let Err(err) = self.store.delete(key.as_str()).await {
            warn!(url = %key, error = %err, "cache delete failed");
        }
    }

    pub async fn keys(&self) -> Vec<String> {
        self.store.keys().await.unwrap_or_else(|err| {
            warn!(error = %err, "cache listing failed");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GatewayError, Result, Viewport};
    use async_trait::async_trait;
    use std::num::NonZeroUsize;
    use std::time::Duration;

    fn key(url: &str) -> NormalizedUrl {
        crate::RenderTarget::parse(url, Viewport::default())
            .unwrap()
            .key
    }

    fn layer() -> CacheLayer {
        CacheLayer::new(Arc::new(MemoryStore::new(
            NonZeroUsize::new(16).unwrap(),
            Duration::from_secs(3600),
        )))
    }

    #[tokio::test]
    async fn populate_does_not_overwrite_existing_entry() {
        let cache = layer();
        let k = key("https://example.com/");

        assert!(cache.populate(&k, Bytes::from_static(b"first")).await);
        assert!(!cache.populate(&k, Bytes::from_static(b"second")).await);
        assert_eq!(cache.lookup(&k).await, Some(Bytes::from_static(b"first")));
    }

    #[tokio::test]
    async fn invalidate_then_populate_writes_again() {
        let cache = layer();
        let k = key("https://example.com/page");

        cache.populate(&k, Bytes::from_static(b"stale")).await;
        cache.invalidate(&k).await;
        assert_eq!(cache.lookup(&k).await, None);
        assert!(cache.populate(&k, Bytes::from_static(b"fresh")).await);
        assert_eq!(cache.keys().await, vec!["https://example.com/page".to_string()]);
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<Bytes>> {
            Err(GatewayError::Io(std::io::Error::other("store offline")))
        }
        async fn set(&self, _key: &str, _content: Bytes) -> Result<()> {
            Err(GatewayError::Io(std::io::Error::other("store offline")))
        }
        async fn has(&self, _key: &str) -> Result<bool> {
            Ok(false)
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(GatewayError::Io(std::io::Error::other("store offline")))
        }
        async fn keys(&self) -> Result<Vec<String>> {
            Err(GatewayError::Io(std::io::Error::other("store offline")))
        }
    }

    #[tokio::test]
    async fn store_failures_degrade_to_misses() {
        let cache = CacheLayer::new(Arc::new(BrokenStore));
        let k = key("https://example.com/");

        assert_eq!(cache.lookup(&k).await, None);
        assert!(!cache.populate(&k, Bytes::from_static(b"x")).await);
        cache.invalidate(&k).await;
        assert!(cache.keys().await.is_empty());
    }
}
