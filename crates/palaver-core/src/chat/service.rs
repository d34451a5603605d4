//! Chat service orchestrating the ephemeral session lifecycle.
//!
//! `ChatService` coordinates the session cache, the completion provider, and
//! the archiver: find-or-create the active session, append entries with a
//! sliding TTL, invoke the completion backend, and hand closed sessions to
//! the archival path.
//!
//! The three cache keys of a session (message list, metadata record, active
//! index) are one logical resource: every append refreshes all of them to
//! the same window so the pair can never drift apart.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use palaver_types::completion::ChatTurn;
use palaver_types::error::{CacheError, ChatError};
use palaver_types::session::{SessionEntry, SessionMetadata};
use tracing::{info, warn};

use crate::archive::{ArchiveOutcome, ArchiveRepository, Archiver};
use crate::cache::SessionCache;
use crate::chat::locator;
use crate::completion::CompletionProvider;
use crate::keys;

/// How many times find-or-create retries when it loses the creation race to
/// a concurrent first message whose index entry then lapses immediately.
const CREATE_ATTEMPTS: usize = 3;

/// Orchestrates chat session lifecycle over the ephemeral cache.
///
/// Generic over `SessionCache`, `CompletionProvider`, and
/// `ArchiveRepository` to maintain clean architecture (palaver-core never
/// depends on palaver-infra).
pub struct ChatService<C: SessionCache, P: CompletionProvider, A: ArchiveRepository> {
    cache: Arc<C>,
    provider: P,
    archiver: Arc<Archiver<C, A>>,
    ttl: Duration,
}

impl<C: SessionCache, P: CompletionProvider, A: ArchiveRepository> ChatService<C, P, A> {
    /// Create a new chat service with the given collaborators and TTL window.
    pub fn new(cache: Arc<C>, provider: P, archiver: Arc<Archiver<C, A>>, ttl: Duration) -> Self {
        Self {
            cache,
            provider,
            archiver,
            ttl,
        }
    }

    /// Access the archiver shared with the eviction notifier.
    pub fn archiver(&self) -> &Arc<Archiver<C, A>> {
        &self.archiver
    }

    /// Handle one user message end to end: resolve or create the active
    /// session, append the user entry, call the completion provider with the
    /// full history, append and return the assistant reply.
    ///
    /// On provider failure the user entry stays in the session (no rollback);
    /// a user message is never silently lost even when the reply fails.
    pub async fn send_message(
        &self,
        user_id: i64,
        text: &str,
    ) -> Result<SessionEntry, ChatError> {
        let session_id = self.resolve_or_create_session(user_id).await?;

        let user_entry = SessionEntry::user(text);
        self.append_entry(&session_id, user_id, &user_entry).await?;

        let history = self.get_conversation(&session_id).await?;
        let turns: Vec<ChatTurn> = history.iter().map(ChatTurn::from).collect();
        let reply = self.provider.complete(&turns).await?;

        let assistant_entry = SessionEntry::assistant(reply);
        self.append_entry(&session_id, user_id, &assistant_entry)
            .await?;

        Ok(assistant_entry)
    }

    /// Read a session's full ordered history.
    ///
    /// Entries that fail to deserialize are skipped, never failing the whole
    /// read; an absent key yields an empty vec.
    pub async fn get_conversation(
        &self,
        session_id: &str,
    ) -> Result<Vec<SessionEntry>, ChatError> {
        let raw = self.cache.lrange(&keys::messages_key(session_id)).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in &raw {
            match serde_json::from_str::<SessionEntry>(item) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(session_id, error = %e, "skipping unreadable session entry"),
            }
        }
        Ok(entries)
    }

    /// Explicitly close and archive the user's active session.
    ///
    /// No-op when no session is active. The cache keys are only deleted
    /// after archival succeeds (or is fenced out); on archival failure the
    /// session stays live so the TTL expiry path gets a second chance.
    pub async fn complete_conversation(&self, user_id: i64) -> Result<(), ChatError> {
        let Some(session_id) = locator::find_active(self.cache.as_ref(), user_id).await? else {
            return Ok(());
        };

        let entries = self.get_conversation(&session_id).await?;
        let metadata = self.read_metadata(&session_id).await?;

        let outcome = self
            .archiver
            .archive_once(&session_id, &metadata, &entries)
            .await?;
        if let ArchiveOutcome::AlreadyArchived = outcome {
            info!(session_id, "explicit completion raced an earlier archival");
        }

        for key in [
            keys::messages_key(&session_id),
            keys::metadata_key(&session_id),
            keys::active_key(user_id),
        ] {
            self.cache.del(&key).await?;
        }
        info!(user_id, session_id, "conversation completed");
        Ok(())
    }

    /// The user's active session id, if any.
    pub async fn get_active_session_id(
        &self,
        user_id: i64,
    ) -> Result<Option<String>, ChatError> {
        Ok(locator::find_active(self.cache.as_ref(), user_id).await?)
    }

    /// Resolve the active session for a user, creating one atomically when
    /// none exists.
    ///
    /// Creation is a single conditional set on the `active:<user>` index, so
    /// two concurrent first messages can never both mint a session: the
    /// loser of the `set_nx` reads the winner's id back on the next pass.
    async fn resolve_or_create_session(&self, user_id: i64) -> Result<String, ChatError> {
        for _ in 0..CREATE_ATTEMPTS {
            if let Some(session_id) = locator::find_active(self.cache.as_ref(), user_id).await? {
                return Ok(session_id);
            }

            let candidate = keys::session_id(user_id, Utc::now().timestamp_millis());
            if self
                .cache
                .set_nx(&keys::active_key(user_id), &candidate, self.ttl)
                .await?
            {
                info!(user_id, session_id = %candidate, "created new session");
                return Ok(candidate);
            }
            // Lost the creation race; loop to pick up the winner's id.
        }
        Err(ChatError::SessionUnresolvable { user_id })
    }

    /// Append one entry and refresh the whole session's lifetime.
    async fn append_entry(
        &self,
        session_id: &str,
        user_id: i64,
        entry: &SessionEntry,
    ) -> Result<(), ChatError> {
        let payload = serde_json::to_string(entry)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.cache
            .rpush(&keys::messages_key(session_id), &payload, self.ttl)
            .await?;
        self.upsert_metadata(session_id, user_id).await?;
        self.refresh_ttl(session_id, user_id).await?;
        Ok(())
    }

    /// Create or touch the metadata record for a session.
    async fn upsert_metadata(&self, session_id: &str, user_id: i64) -> Result<(), ChatError> {
        let key = keys::metadata_key(session_id);
        let metadata = match self.cache.get(&key).await? {
            Some(json) => match serde_json::from_str::<SessionMetadata>(&json) {
                Ok(mut metadata) => {
                    metadata.touch();
                    metadata
                }
                Err(e) => {
                    warn!(session_id, error = %e, "rebuilding unreadable session metadata");
                    self.fresh_metadata(session_id, user_id)
                }
            },
            None => self.fresh_metadata(session_id, user_id),
        };
        let json = serde_json::to_string(&metadata)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.cache.set(&key, &json, self.ttl).await?;
        Ok(())
    }

    fn fresh_metadata(&self, session_id: &str, user_id: i64) -> SessionMetadata {
        let started_at = keys::owner_of(session_id)
            .map(|(_, started)| started)
            .unwrap_or_else(|| Utc::now().timestamp_millis());
        SessionMetadata::new(session_id, user_id, started_at)
    }

    /// Reset all three of a session's keys to the full window.
    async fn refresh_ttl(&self, session_id: &str, user_id: i64) -> Result<(), ChatError> {
        for key in [
            keys::messages_key(session_id),
            keys::metadata_key(session_id),
            keys::active_key(user_id),
        ] {
            self.cache.expire(&key, self.ttl).await?;
        }
        Ok(())
    }

    /// Read the metadata record, reconstructing it from the session id when
    /// the cached copy is gone or unreadable.
    async fn read_metadata(&self, session_id: &str) -> Result<SessionMetadata, ChatError> {
        if let Some(json) = self.cache.get(&keys::metadata_key(session_id)).await? {
            if let Ok(metadata) = serde_json::from_str::<SessionMetadata>(&json) {
                return Ok(metadata);
            }
        }
        crate::archive::synthesize_metadata(session_id)
            .ok_or_else(|| CacheError::Serialization(format!("unparseable session id: {session_id}")).into())
    }
}
