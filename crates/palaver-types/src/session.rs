//! Ephemeral session wire types.
//!
//! These are the JSON shapes stored in the session cache: one list entry per
//! conversational turn, and one metadata record per session. Field names are
//! camelCase on the wire (`messageId`, `lastUpdatedAt`) and timestamps are
//! epoch milliseconds.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an ephemeral session.
///
/// A session is `Active` for its whole cache lifetime; once archived its
/// keys are gone, so no terminal status is ever written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Active,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "ACTIVE"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(SessionStatus::Active),
            other => Err(format!("invalid session status: '{other}'")),
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Active
    }
}

/// One conversational turn stored in the session's message list.
///
/// The role is an open string on the wire (`"user"` / `"assistant"`); the
/// archiver maps anything unrecognized to the durable USER role rather than
/// rejecting the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub role: String,
    pub content: String,
    /// Epoch milliseconds at which the entry was appended.
    pub timestamp: i64,
    /// Opaque unique id, minted per entry.
    pub message_id: String,
}

impl SessionEntry {
    /// Role string for user turns.
    pub const ROLE_USER: &'static str = "user";
    /// Role string for assistant turns.
    pub const ROLE_ASSISTANT: &'static str = "assistant";

    /// Create an entry stamped with the current time and a fresh id.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now().timestamp_millis(),
            message_id: Uuid::now_v7().to_string(),
        }
    }

    /// Create a user-role entry.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Self::ROLE_USER, content)
    }

    /// Create an assistant-role entry.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Self::ROLE_ASSISTANT, content)
    }
}

/// Metadata record stored beside a session's message list.
///
/// The two cache entries share one logical lifetime: they are created and
/// TTL-refreshed together, and both being absent means "no active session".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// The session id (`thread_<user>_<startedAt>`).
    pub thread_id: String,
    pub user_id: i64,
    /// Epoch milliseconds at session creation.
    pub started_at: i64,
    /// Epoch milliseconds of the most recent append.
    pub last_updated_at: i64,
    #[serde(default)]
    pub status: SessionStatus,
}

impl SessionMetadata {
    /// Fresh metadata for a session that has just received its first entry.
    pub fn new(thread_id: impl Into<String>, user_id: i64, started_at: i64) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_id,
            started_at,
            last_updated_at: started_at,
            status: SessionStatus::Active,
        }
    }

    /// Advance `lastUpdatedAt` to now.
    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now().timestamp_millis();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_wire_shape_is_camel_case() {
        let entry = SessionEntry {
            role: "user".to_string(),
            content: "hi".to_string(),
            timestamp: 1_700_000_000_000,
            message_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"messageId\":\"abc\""));
        assert!(json.contains("\"timestamp\":1700000000000"));
    }

    #[test]
    fn entry_roundtrip() {
        let entry = SessionEntry::user("hello");
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: SessionEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn entry_ids_are_unique() {
        let a = SessionEntry::user("x");
        let b = SessionEntry::user("x");
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn metadata_wire_shape() {
        let meta = SessionMetadata::new("thread_42_1700000000000", 42, 1_700_000_000_000);
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"threadId\":\"thread_42_1700000000000\""));
        assert!(json.contains("\"userId\":42"));
        assert!(json.contains("\"startedAt\":1700000000000"));
        assert!(json.contains("\"lastUpdatedAt\":1700000000000"));
        assert!(json.contains("\"status\":\"ACTIVE\""));
    }

    #[test]
    fn metadata_status_defaults_to_active() {
        let json = r#"{"threadId":"t","userId":1,"startedAt":0,"lastUpdatedAt":0}"#;
        let meta: SessionMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.status, SessionStatus::Active);
    }

    #[test]
    fn metadata_touch_advances() {
        let mut meta = SessionMetadata::new("t", 1, 0);
        meta.touch();
        assert!(meta.last_updated_at > 0);
        assert_eq!(meta.started_at, 0);
    }

    #[test]
    fn status_roundtrip() {
        let parsed: SessionStatus = "active".parse().unwrap();
        assert_eq!(parsed, SessionStatus::Active);
        assert!("gone".parse::<SessionStatus>().is_err());
    }
}
