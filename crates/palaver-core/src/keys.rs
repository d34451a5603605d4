//! Cache key scheme.
//!
//! Pure naming logic, no state. A session id is `thread_<user>_<startedAt>`;
//! its cache footprint is three co-TTL'd keys:
//!
//! - `thread:<sid>:messages` -- the ordered entry list
//! - `thread:<sid>:metadata` -- the metadata record
//! - `active:<user>`         -- secondary index mapping a user to their one
//!   active session id (created atomically, closing the find-or-create race)
//!
//! plus a one-shot `archived:<sid>` claim key that fences duplicate archival.
//! Every key is reversible back to the session id, and the session id itself
//! encodes its owner and creation time.

const SESSION_PREFIX: &str = "thread_";
const KEY_PREFIX: &str = "thread:";
const MESSAGES_SUFFIX: &str = ":messages";
const METADATA_SUFFIX: &str = ":metadata";

/// Mint a session id for a user and creation timestamp (epoch millis).
pub fn session_id(user_id: i64, started_at_ms: i64) -> String {
    format!("{SESSION_PREFIX}{user_id}_{started_at_ms}")
}

/// Cache key of a session's message list.
pub fn messages_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}{MESSAGES_SUFFIX}")
}

/// Cache key of a session's metadata record.
pub fn metadata_key(session_id: &str) -> String {
    format!("{KEY_PREFIX}{session_id}{METADATA_SUFFIX}")
}

/// Cache key of the per-user active-session index.
pub fn active_key(user_id: i64) -> String {
    format!("active:{user_id}")
}

/// Cache key of the one-shot archival claim for a session.
pub fn claim_key(session_id: &str) -> String {
    format!("archived:{session_id}")
}

/// Glob pattern matching any metadata key belonging to a user.
pub fn metadata_pattern(user_id: i64) -> String {
    format!("{KEY_PREFIX}{SESSION_PREFIX}{user_id}_*{METADATA_SUFFIX}")
}

/// Reverse a messages key back to its session id, if it is one.
pub fn session_of_messages_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEY_PREFIX)?.strip_suffix(MESSAGES_SUFFIX)
}

/// Reverse a metadata key back to its session id, if it is one.
pub fn session_of_metadata_key(key: &str) -> Option<&str> {
    key.strip_prefix(KEY_PREFIX)?.strip_suffix(METADATA_SUFFIX)
}

/// Decode the owning user id and creation timestamp out of a session id.
///
/// Returns `None` for ids that do not follow the `thread_<u>_<t>` shape.
pub fn owner_of(session_id: &str) -> Option<(i64, i64)> {
    let rest = session_id.strip_prefix(SESSION_PREFIX)?;
    let (user, started) = rest.split_once('_')?;
    Some((user.parse().ok()?, started.parse().ok()?))
}

/// Match a key against a glob pattern where `*` matches any run of
/// characters (including none). This is the only wildcard the key scheme
/// needs; patterns without `*` require exact equality.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let mut segments = pattern.split('*');
    // The first segment anchors at the start of the key.
    let first = segments.next().unwrap_or("");
    let Some(mut rest) = key.strip_prefix(first) else {
        return false;
    };
    let segments: Vec<&str> = segments.collect();
    if segments.is_empty() {
        // No wildcard: exact match only.
        return rest.is_empty();
    }

    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if i == last {
            // The final segment anchors at the end of the key.
            return segment.is_empty() || rest.ends_with(segment);
        }
        if segment.is_empty() {
            continue;
        }
        match rest.find(segment) {
            Some(pos) => rest = &rest[pos + segment.len()..],
            None => return false,
        }
    }
    true
}
