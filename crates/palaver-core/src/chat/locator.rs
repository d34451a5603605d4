//! Active-session locator.
//!
//! Resolves "the" active session id for a user. The primary lookup is the
//! `active:<user>` index key, which is maintained atomically alongside
//! session creation. The keyspace pattern scan is kept only as a recovery
//! path for an index that lapsed ahead of its pair; it is never used to
//! decide whether to create a session (check-then-create is exactly the race
//! the index exists to close).

use palaver_types::error::CacheError;
use tracing::debug;

use crate::cache::SessionCache;
use crate::keys;

/// Find the active session id for a user, if any.
pub async fn find_active<C: SessionCache>(
    cache: &C,
    user_id: i64,
) -> Result<Option<String>, CacheError> {
    if let Some(session_id) = cache.get(&keys::active_key(user_id)).await? {
        return Ok(Some(session_id));
    }

    // Recovery: the index expired but the session pair may still be live.
    let matches = cache.keys(&keys::metadata_pattern(user_id)).await?;
    let recovered = matches
        .first()
        .and_then(|key| keys::session_of_metadata_key(key))
        .map(String::from);
    if let Some(session_id) = &recovered {
        debug!(user_id, session_id, "active session recovered via pattern scan");
    }
    Ok(recovered)
}
