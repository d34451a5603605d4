//! Completion request types.
//!
//! A completion provider receives the ordered conversation history as
//! `ChatTurn`s and returns a single text reply. Provider-specific request
//! and response envelopes live with the provider implementations in
//! palaver-infra.

use serde::{Deserialize, Serialize};

use crate::session::SessionEntry;

/// One turn of conversation history handed to a completion provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl From<&SessionEntry> for ChatTurn {
    fn from(entry: &SessionEntry) -> Self {
        Self {
            role: entry.role.clone(),
            content: entry.content.clone(),
        }
    }
}
