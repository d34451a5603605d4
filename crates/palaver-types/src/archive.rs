//! Durable thread and message entities.
//!
//! These model the relational side of the handoff: one `Thread` row plus N
//! `Message` rows are created per archived session, always in a single
//! transaction. Ids are generated by the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Role of a durable message.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (role IN ('USER', 'ASSISTANT', 'SYSTEM'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Map an ephemeral entry role to a durable role.
    ///
    /// Unrecognized roles fall back to `User` so a single odd entry never
    /// blocks archival of the whole session.
    pub fn from_entry_role(role: &str) -> Self {
        match role {
            "assistant" => MessageRole::Assistant,
            "system" => MessageRole::System,
            _ => MessageRole::User,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "USER"),
            MessageRole::Assistant => write!(f, "ASSISTANT"),
            MessageRole::System => write!(f, "SYSTEM"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(MessageRole::User),
            "ASSISTANT" => Ok(MessageRole::Assistant),
            "SYSTEM" => Ok(MessageRole::System),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A durable conversation thread owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub user_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable message attached to a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub thread_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A message not yet persisted, as handed to the archive repository.
///
/// Order within the slice is the archival order; the repository must
/// preserve it.
#[derive(Debug, Clone)]
pub struct ArchivedMessage {
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A registered user, as resolved by the archive repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub created_at: DateTime<Utc>,
}
