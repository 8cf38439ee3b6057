//! Redis-backed snapshot store.
//!
//! Entries live under `{namespace}:entry:{key}` with a `PX` expiry equal to
//! the store's max age. Recency is tracked in the sorted set
//! `{namespace}:recency`, scored by a shared counter so several gateway
//! instances agree on the eviction order. Writes and reads that touch
//! recency run as Lua scripts and are atomic on the server.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use once_cell::sync::Lazy;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::debug;

use super::CacheStore;
use crate::Result;

pub const DEFAULT_NAMESPACE: &str = "prerender";

static SET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
redis.call('SET', KEYS[1], ARGV[2], 'PX', ARGV[3])
redis.call('ZADD', KEYS[2], redis.call('INCR', KEYS[3]), ARGV[1])
local overflow = redis.call('ZCARD', KEYS[2]) - tonumber(ARGV[4])
local evicted = {}
if overflow > 0 then
  evicted = redis.call('ZRANGE', KEYS[2], 0, overflow - 1)
  for _, member in ipairs(evicted) do
    redis.call('DEL', ARGV[5] .. member)
    redis.call('ZREM', KEYS[2], member)
  end
end
return evicted
",
    )
});

static GET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local content = redis.call('GET', KEYS[1])
if not content then
  redis.call('ZREM', KEYS[2], ARGV[1])
  return false
end
redis.call('ZADD', KEYS[2], redis.call('INCR', KEYS[3]), ARGV[1])
return content
",
    )
});

static KEYS_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
local members = redis.call('ZREVRANGE', KEYS[1], 0, -1)
local live = {}
for _, member in ipairs(members) do
  if redis.call('EXISTS', ARGV[1] .. member) == 1 then
    table.insert(live, member)
  else
    redis.call('ZREM', KEYS[1], member)
  end
end
return live
",
    )
});

/// Shared LRU store with a max-age bound, kept in Redis.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    keys: KeySpace,
    capacity: NonZeroUsize,
    max_age: Duration,
}

impl RedisStore {
    /// Connects to `url` (`redis://host:port/db`). Fails if the server is
    /// unreachable.
    pub async fn connect(url: &str, capacity: NonZeroUsize, max_age: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            keys: KeySpace::new(DEFAULT_NAMESPACE),
            capacity,
            max_age,
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.keys = KeySpace::new(namespace);
        self
    }

    fn max_age_millis(&self) -> u64 {
        u64::try_from(self.max_age.as_millis())
            .unwrap_or(u64::MAX)
            .max(1)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let content: Option<Vec<u8>> = GET_SCRIPT
            .key(self.keys.entry(key))
            .key(self.keys.recency())
            .key(self.keys.clock())
            .arg(key)
            .invoke_async(&mut conn)
            .await?;
        Ok(content.map(Bytes::from))
    }

    async fn set(&self, key: &str, content: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let evicted: Vec<String> = SET_SCRIPT
            .key(self.keys.entry(key))
            .key(self.keys.recency())
            .key(self.keys.clock())
            .arg(key)
            .arg(content.as_ref())
            .arg(self.max_age_millis())
            .arg(self.capacity.get())
            .arg(self.keys.entry_prefix())
            .invoke_async(&mut conn)
            .await?;
        for key in evicted {
            debug!(key = %key, "evicted least recently used cache entry");
        }
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        Ok(conn.exists::<_, bool>(self.keys.entry(key)).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .del(self.keys.entry(key))
            .ignore()
            .zrem(self.keys.recency(), key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(KEYS_SCRIPT
            .key(self.keys.recency())
            .arg(self.keys.entry_prefix())
            .invoke_async(&mut conn)
            .await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct KeySpace {
    namespace: String,
}

impl KeySpace {
    fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn entry_prefix(&self) -> String {
        format!("{}:entry:", self.namespace)
    }

    fn entry(&self, key: &str) -> String {
        format!("{}{key}", self.entry_prefix())
    }

    fn recency(&self) -> String {
        format!("{}:recency", self.namespace)
    }

    fn clock(&self) -> String {
        format!("{}:clock", self.namespace)
    }
}
