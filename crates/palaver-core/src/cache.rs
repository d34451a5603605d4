//! Session cache port.
//!
//! Defines the interface over the ephemeral TTL store: string values, lists,
//! sliding expiry, pattern enumeration, and an eviction feed.
//! Implementations live in palaver-infra.
//!
//! One deliberate strengthening over a plain key-expiry notification: an
//! [`Eviction`] carries the payload that was removed, captured atomically at
//! eviction time. Expiry-triggered archival therefore never races the
//! deletion of its own input -- by the time the event is observable, the
//! snapshot is already in hand.

use std::time::Duration;

use palaver_types::error::CacheError;
use tokio::sync::broadcast;

/// A value held under a cache key: either a plain string (SET/GET) or an
/// ordered list (RPUSH/LRANGE). One key holds exactly one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    Text(String),
    List(Vec<String>),
}

/// A key removed by TTL lapse, together with its final payload.
///
/// Explicit deletion never produces an eviction; only the store's own
/// expiry sweep does.
#[derive(Debug, Clone)]
pub struct Eviction {
    pub key: String,
    pub value: CacheValue,
}

/// Trait for the ephemeral session store.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
/// All mutating operations are atomic per key; `set_nx` in particular is the
/// conditional-set the session store relies on to make find-or-create safe
/// under concurrency.
pub trait SessionCache: Send + Sync {
    /// Get a string value. Returns None if the key is absent or expired.
    fn get(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Set a string value with a fresh TTL (upsert).
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), CacheError>> + Send;

    /// Set a string value with a fresh TTL only if the key does not already
    /// hold a live value. Returns true if this call created the key.
    fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, CacheError>> + Send;

    /// Append an item to the list under `key`, creating the list if absent.
    /// Returns the new list length. Does not touch the TTL of an existing
    /// list; callers refresh expiry separately.
    fn rpush(
        &self,
        key: &str,
        item: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<usize, CacheError>> + Send;

    /// Read the whole list under `key`, in insertion order. Absent or
    /// expired keys yield an empty vec.
    fn lrange(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Delete a key. Returns true if a live value was removed. Never emits
    /// an eviction.
    fn del(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<bool, CacheError>> + Send;

    /// Reset the TTL of a live key. Returns false if the key is absent.
    fn expire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool, CacheError>> + Send;

    /// Enumerate live keys matching a glob pattern (see [`crate::keys::glob_match`]).
    fn keys(
        &self,
        pattern: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, CacheError>> + Send;

    /// Subscribe to the eviction feed. The subscription is best-effort: a
    /// slow consumer may observe lag, never blockage of the store.
    fn subscribe_evictions(&self) -> broadcast::Receiver<Eviction>;
}
