//! Eviction notifier: turns TTL lapses into archival.
//!
//! A process-wide background task subscribed to the cache's eviction feed.
//! Only message-list evictions trigger work; the metadata record and active
//! index of the same session lapse in the same breath (matched TTLs) and
//! acting once is enough. The evicted payload is the snapshot -- captured by
//! the store before deletion -- so the handler never depends on reading keys
//! that are already gone.
//!
//! Failure policy: any error while handling one eviction is logged and the
//! notification dropped. There is no retry and no dead-letter; the
//! subscription loop itself never dies from a handler error.

use std::sync::Arc;

use palaver_types::session::SessionEntry;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{self, ArchiveOutcome, ArchiveRepository, Archiver};
use crate::cache::{CacheValue, Eviction, SessionCache};
use crate::keys;

/// Long-lived subscriber to the cache eviction feed.
///
/// Starts with the service and runs until the cancellation token fires at
/// process shutdown.
pub struct EvictionNotifier;

impl EvictionNotifier {
    /// Spawn the notifier task.
    pub fn spawn<C, A>(
        cache: Arc<C>,
        archiver: Arc<Archiver<C, A>>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        C: SessionCache + 'static,
        A: ArchiveRepository + 'static,
    {
        let mut feed = cache.subscribe_evictions();
        tokio::spawn(async move {
            info!("eviction notifier started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = feed.recv() => match received {
                        Ok(eviction) => {
                            Self::handle(cache.as_ref(), archiver.as_ref(), eviction).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "eviction feed lagged, notifications lost");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("eviction notifier stopped");
        })
    }

    /// Handle one eviction. Errors are logged and swallowed.
    async fn handle<C, A>(cache: &C, archiver: &Archiver<C, A>, eviction: Eviction)
    where
        C: SessionCache,
        A: ArchiveRepository,
    {
        // Only the message list drives archival; metadata and index
        // evictions for the same session are ignored.
        let Some(session_id) = keys::session_of_messages_key(&eviction.key) else {
            return;
        };

        let CacheValue::List(items) = eviction.value else {
            warn!(session_id, "messages key evicted with non-list payload");
            return;
        };

        let mut entries = Vec::with_capacity(items.len());
        for item in &items {
            match serde_json::from_str::<SessionEntry>(item) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(session_id, error = %e, "skipping unreadable evicted entry"),
            }
        }

        // The metadata record may still be readable for a moment; fall back
        // to the identity encoded in the session id.
        let metadata = match cache.get(&keys::metadata_key(session_id)).await {
            Ok(Some(json)) => serde_json::from_str(&json)
                .ok()
                .or_else(|| archive::synthesize_metadata(session_id)),
            _ => archive::synthesize_metadata(session_id),
        };
        let Some(metadata) = metadata else {
            warn!(session_id, "evicted session has no resolvable owner, dropping");
            return;
        };

        match archiver.archive_once(session_id, &metadata, &entries).await {
            Ok(ArchiveOutcome::Archived(thread)) => {
                info!(session_id, thread_id = thread.id, "expired session archived");
            }
            Ok(ArchiveOutcome::AlreadyArchived) => {
                info!(session_id, "expired session was already archived");
            }
            Ok(ArchiveOutcome::Skipped) => {}
            Err(e) => {
                // Accepted weakness: the cache has already dropped the keys,
                // so this session is lost.
                warn!(session_id, error = %e, "archival of expired session failed, dropped");
            }
        }
    }
}
