//! In-memory implementation of `SessionCache`.
//!
//! A dashmap of string key to (value, deadline). Expired entries are
//! invisible to every read path the moment their deadline passes, regardless
//! of when the sweeper gets to them. A background sweeper task removes
//! expired entries and publishes each one on the eviction feed *with its
//! payload* -- the snapshot is captured in the same removal, so consumers of
//! the feed never race the deletion.
//!
//! Per-key atomicity comes from the dashmap entry API (`set_nx` holds the
//! shard lock across check and insert). That is sufficient here because this
//! process is the sole owner of the namespace.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use palaver_core::cache::{CacheValue, Eviction, SessionCache};
use palaver_core::keys;
use palaver_types::error::CacheError;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Eviction feed capacity; a lagging subscriber loses notifications rather
/// than blocking the sweeper.
const EVICTION_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
enum SlotValue {
    Text(String),
    List(Vec<String>),
}

impl SlotValue {
    fn into_cache_value(self) -> CacheValue {
        match self {
            SlotValue::Text(s) => CacheValue::Text(s),
            SlotValue::List(items) => CacheValue::List(items),
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: SlotValue,
    expires_at: Instant,
}

impl Slot {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process TTL key-value/list store with an eviction feed.
pub struct MemoryCache {
    entries: DashMap<String, Slot>,
    evictions: broadcast::Sender<Eviction>,
}

impl MemoryCache {
    /// Create an empty cache. Call [`MemoryCache::start_sweeper`] to get
    /// evictions published; reads honor TTLs either way.
    pub fn new() -> Arc<Self> {
        let (evictions, _) = broadcast::channel(EVICTION_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: DashMap::new(),
            evictions,
        })
    }

    /// Spawn the background sweep task. Runs until the token is cancelled.
    pub fn start_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("cache sweeper started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => cache.sweep(),
                }
            }
            info!("cache sweeper stopped");
        })
    }

    /// Remove every expired entry and publish it on the eviction feed.
    fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in expired {
            // Re-check under the shard lock; a write may have revived the key.
            if let Some((key, slot)) = self
                .entries
                .remove_if(&key, |_, slot| slot.is_expired(now))
            {
                debug!(key, "key expired");
                let _ = self.evictions.send(Eviction {
                    key,
                    value: slot.value.into_cache_value(),
                });
            }
        }
    }

    /// Number of live keys (test and introspection helper).
    pub fn live_len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .count()
    }
}

impl SessionCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|slot| {
            if slot.is_expired(now) {
                return None;
            }
            match &slot.value {
                SlotValue::Text(s) => Some(s.clone()),
                SlotValue::List(_) => None,
            }
        }))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Slot {
                value: SlotValue::Text(value.to_string()),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let slot = Slot {
            value: SlotValue::Text(value.to_string()),
            expires_at: now + ttl,
        };
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    // A dead key is as good as absent; it never got swept.
                    occupied.insert(slot);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn rpush(&self, key: &str, item: &str, ttl: Duration) -> Result<usize, CacheError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    occupied.insert(Slot {
                        value: SlotValue::List(vec![item.to_string()]),
                        expires_at: now + ttl,
                    });
                    return Ok(1);
                }
                match &mut occupied.get_mut().value {
                    SlotValue::List(items) => {
                        items.push(item.to_string());
                        Ok(items.len())
                    }
                    SlotValue::Text(_) => Err(CacheError::Backend(format!(
                        "rpush against a string value: {key}"
                    ))),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot {
                    value: SlotValue::List(vec![item.to_string()]),
                    expires_at: now + ttl,
                });
                Ok(1)
            }
        }
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .and_then(|slot| {
                if slot.is_expired(now) {
                    return None;
                }
                match &slot.value {
                    SlotValue::List(items) => Some(items.clone()),
                    SlotValue::Text(_) => None,
                }
            })
            .unwrap_or_default())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        // Explicit deletion never publishes an eviction, even for a key the
        // sweeper has not reached yet.
        match self.entries.remove(key) {
            Some((_, slot)) => Ok(!slot.is_expired(now)),
            None => Ok(false),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut slot) => {
                if slot.is_expired(now) {
                    return Ok(false);
                }
                slot.expires_at = now + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut matched: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .filter(|entry| keys::glob_match(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        matched.sort();
        Ok(matched)
    }

    fn subscribe_evictions(&self) -> broadcast::Receiver<Eviction> {
        self.evictions.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(80);
    const PAST: Duration = Duration::from_millis(150);

    #[tokio::test]
    async fn set_get_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(cache.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_key_is_invisible_without_sweeper() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        tokio::time::sleep(PAST).await;
        assert!(cache.get("k").await.unwrap().is_none());
        assert!(cache.keys("*").await.unwrap().is_empty());
        assert_eq!(cache.live_len(), 0);
    }

    #[tokio::test]
    async fn expire_slides_the_window() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.expire("k", TTL).await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Original deadline has passed, refreshed one has not.
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn expire_on_dead_key_reports_false() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        tokio::time::sleep(PAST).await;
        assert!(!cache.expire("k", TTL).await.unwrap());
        assert!(!cache.expire("missing", TTL).await.unwrap());
    }

    #[tokio::test]
    async fn set_nx_respects_live_keys_only() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("k", "first", TTL).await.unwrap());
        assert!(!cache.set_nx("k", "second", TTL).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("first"));

        tokio::time::sleep(PAST).await;
        // Expired but unswept: conditional set treats it as absent.
        assert!(cache.set_nx("k", "third", TTL).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("third"));
    }

    #[tokio::test]
    async fn rpush_preserves_order() {
        let cache = MemoryCache::new();
        assert_eq!(cache.rpush("l", "a", TTL).await.unwrap(), 1);
        assert_eq!(cache.rpush("l", "b", TTL).await.unwrap(), 2);
        assert_eq!(cache.rpush("l", "c", TTL).await.unwrap(), 3);
        assert_eq!(cache.lrange("l").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn rpush_against_string_value_is_an_error() {
        let cache = MemoryCache::new();
        cache.set("k", "v", TTL).await.unwrap();
        assert!(cache.rpush("k", "a", TTL).await.is_err());
    }

    #[tokio::test]
    async fn rpush_revives_an_expired_list() {
        let cache = MemoryCache::new();
        cache.rpush("l", "old", TTL).await.unwrap();
        tokio::time::sleep(PAST).await;
        assert_eq!(cache.rpush("l", "new", TTL).await.unwrap(), 1);
        assert_eq!(cache.lrange("l").await.unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn del_reports_liveness_and_never_evicts() {
        let cache = MemoryCache::new();
        let mut feed = cache.subscribe_evictions();
        cache.set("k", "v", TTL).await.unwrap();
        assert!(cache.del("k").await.unwrap());
        assert!(!cache.del("k").await.unwrap());
        assert!(feed.try_recv().is_err(), "del must not publish evictions");
    }

    #[tokio::test]
    async fn keys_matches_glob_patterns() {
        let cache = MemoryCache::new();
        cache.set("thread:thread_42_1:metadata", "{}", TTL).await.unwrap();
        cache.set("thread:thread_42_1:messages", "{}", TTL).await.unwrap();
        cache.set("thread:thread_7_1:metadata", "{}", TTL).await.unwrap();

        let matched = cache.keys("thread:thread_42_*:metadata").await.unwrap();
        assert_eq!(matched, vec!["thread:thread_42_1:metadata"]);
    }

    #[tokio::test]
    async fn sweeper_publishes_eviction_with_payload() {
        let cache = MemoryCache::new();
        let shutdown = CancellationToken::new();
        let handle = cache.start_sweeper(Duration::from_millis(20), shutdown.clone());
        let mut feed = cache.subscribe_evictions();

        cache.rpush("l", "a", TTL).await.unwrap();
        cache.rpush("l", "b", TTL).await.unwrap();

        let eviction = tokio::time::timeout(Duration::from_secs(2), feed.recv())
            .await
            .expect("eviction within deadline")
            .unwrap();
        assert_eq!(eviction.key, "l");
        assert_eq!(
            eviction.value,
            CacheValue::List(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(cache.live_len(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn sweeper_leaves_live_keys_alone() {
        let cache = MemoryCache::new();
        let shutdown = CancellationToken::new();
        let handle = cache.start_sweeper(Duration::from_millis(20), shutdown.clone());

        cache.set("stay", "v", Duration::from_secs(60)).await.unwrap();
        cache.set("go", "v", TTL).await.unwrap();
        tokio::time::sleep(PAST).await;

        assert_eq!(cache.get("stay").await.unwrap().as_deref(), Some("v"));
        assert!(cache.get("go").await.unwrap().is_none());

        shutdown.cancel();
        handle.await.unwrap();
    }
}
