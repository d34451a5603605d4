//! Archival path: the one place a session crosses into durable storage.
//!
//! Both explicit completion and TTL expiry funnel into
//! [`Archiver::archive_once`], which takes a one-shot claim on the session
//! id before writing. Whichever caller claims first performs the durable
//! write; the loser observes [`ArchiveOutcome::AlreadyArchived`] and writes
//! nothing. The claim is a `set_nx` on the cache, so the fencing is as
//! atomic as session creation itself.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use palaver_types::archive::{ArchivedMessage, MessageRole, Thread, UserRecord};
use palaver_types::error::{ChatError, RepositoryError};
use palaver_types::session::{SessionEntry, SessionMetadata};
use tracing::{info, warn};

use crate::cache::SessionCache;
use crate::keys;

/// Repository trait for the durable side of the handoff.
///
/// Implementations live in palaver-infra (e.g., `SqliteArchiveRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ArchiveRepository: Send + Sync {
    /// Resolve a user by id.
    fn find_user(
        &self,
        user_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<UserRecord>, RepositoryError>> + Send;

    /// Create one thread plus all of its messages in a single transaction.
    /// Either everything commits or nothing is visible. Message order must
    /// be preserved exactly as given.
    fn archive_thread(
        &self,
        user_id: i64,
        messages: &[ArchivedMessage],
    ) -> impl std::future::Future<Output = Result<Thread, RepositoryError>> + Send;
}

/// What `archive_once` did with a snapshot.
#[derive(Debug, Clone)]
pub enum ArchiveOutcome {
    /// This caller won the claim and wrote the thread.
    Archived(Thread),
    /// Another caller already claimed this session; nothing written.
    AlreadyArchived,
    /// Empty snapshot; nothing to archive.
    Skipped,
}

/// Claim lifetime: long enough to outlive any racing caller of the same
/// session, bounded so abandoned claims do not accumulate forever.
const CLAIM_TTL: Duration = Duration::from_secs(2 * 30 * 60);

/// Guarded writer that materializes a durable thread from an ephemeral
/// snapshot, at most once per session.
pub struct Archiver<C: SessionCache, A: ArchiveRepository> {
    cache: Arc<C>,
    repo: A,
}

impl<C: SessionCache, A: ArchiveRepository> Archiver<C, A> {
    pub fn new(cache: Arc<C>, repo: A) -> Self {
        Self { cache, repo }
    }

    /// Access the cache this archiver claims against.
    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    /// Access the durable repository.
    pub fn repo(&self) -> &A {
        &self.repo
    }

    /// Archive a point-in-time snapshot of a session, exactly once.
    ///
    /// Empty snapshots are skipped without taking the claim, so a session
    /// that never held content leaves no trace. A claim that is won but
    /// whose durable write then fails is released again before the error
    /// propagates, so a later caller can retry while the session data is
    /// still live; the session is only lost if the cache drops the keys
    /// before any retry happens (accepted weakness of the expiry path --
    /// the notifier logs and drops).
    pub async fn archive_once(
        &self,
        session_id: &str,
        metadata: &SessionMetadata,
        entries: &[SessionEntry],
    ) -> Result<ArchiveOutcome, ChatError> {
        if entries.is_empty() {
            return Ok(ArchiveOutcome::Skipped);
        }

        let claimed = self
            .cache
            .set_nx(&keys::claim_key(session_id), "1", CLAIM_TTL)
            .await?;
        if !claimed {
            info!(session_id, "session already claimed for archival, skipping");
            return Ok(ArchiveOutcome::AlreadyArchived);
        }

        match self.write_thread(metadata, entries).await {
            Ok(thread) => {
                info!(
                    session_id,
                    thread_id = thread.id,
                    message_count = entries.len(),
                    "session archived"
                );
                Ok(ArchiveOutcome::Archived(thread))
            }
            Err(e) => {
                // Release the claim: nothing durable was written, so the
                // session must stay archivable for whichever path retries.
                if let Err(del_err) = self.cache.del(&keys::claim_key(session_id)).await {
                    warn!(session_id, error = %del_err, "failed to release archival claim");
                }
                Err(e)
            }
        }
    }

    /// Resolve the owner and persist the thread. No claim handling here;
    /// `archive_once` owns the fencing around this call.
    async fn write_thread(
        &self,
        metadata: &SessionMetadata,
        entries: &[SessionEntry],
    ) -> Result<Thread, ChatError> {
        let user = self
            .repo
            .find_user(metadata.user_id)
            .await?
            .ok_or(RepositoryError::NotFound)?;

        let messages: Vec<ArchivedMessage> = entries
            .iter()
            .map(|entry| ArchivedMessage {
                role: MessageRole::from_entry_role(&entry.role),
                content: entry.content.clone(),
                created_at: DateTime::from_timestamp_millis(entry.timestamp)
                    .unwrap_or_else(Utc::now),
            })
            .collect();

        Ok(self.repo.archive_thread(user.id, &messages).await?)
    }
}

/// Build metadata for a session whose metadata record is no longer readable,
/// from the information encoded in the session id itself.
pub fn synthesize_metadata(session_id: &str) -> Option<SessionMetadata> {
    let (user_id, started_at) = keys::owner_of(session_id)?;
    warn!(session_id, "session metadata unreadable, reconstructed from key");
    Some(SessionMetadata::new(session_id, user_id, started_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheValue, Eviction};
    use palaver_types::error::CacheError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast;

    /// Minimal cache double: live keys only, no expiry.
    struct StubCache {
        entries: Mutex<HashMap<String, String>>,
        evictions: broadcast::Sender<Eviction>,
    }

    impl StubCache {
        fn new() -> Self {
            let (evictions, _) = broadcast::channel(16);
            Self {
                entries: Mutex::new(HashMap::new()),
                evictions,
            }
        }
    }

    impl SessionCache for StubCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), CacheError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn set_nx(&self, key: &str, value: &str, _ttl: Duration) -> Result<bool, CacheError> {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(key) {
                Ok(false)
            } else {
                entries.insert(key.to_string(), value.to_string());
                Ok(true)
            }
        }

        async fn rpush(&self, _key: &str, _item: &str, _ttl: Duration) -> Result<usize, CacheError> {
            unimplemented!("not needed by archiver tests")
        }

        async fn lrange(&self, _key: &str) -> Result<Vec<String>, CacheError> {
            Ok(Vec::new())
        }

        async fn del(&self, key: &str) -> Result<bool, CacheError> {
            Ok(self.entries.lock().unwrap().remove(key).is_some())
        }

        async fn expire(&self, key: &str, _ttl: Duration) -> Result<bool, CacheError> {
            Ok(self.entries.lock().unwrap().contains_key(key))
        }

        async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .keys()
                .filter(|k| keys::glob_match(pattern, k))
                .cloned()
                .collect())
        }

        fn subscribe_evictions(&self) -> broadcast::Receiver<Eviction> {
            self.evictions.subscribe()
        }
    }

    /// Repository double that records archived threads in memory.
    struct StubRepo {
        threads: Mutex<Vec<(i64, Vec<ArchivedMessage>)>>,
        known_user: i64,
    }

    impl StubRepo {
        fn new(known_user: i64) -> Self {
            Self {
                threads: Mutex::new(Vec::new()),
                known_user,
            }
        }
    }

    impl ArchiveRepository for StubRepo {
        async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, RepositoryError> {
            if user_id == self.known_user {
                Ok(Some(UserRecord {
                    id: user_id,
                    username: "test".to_string(),
                    created_at: Utc::now(),
                }))
            } else {
                Ok(None)
            }
        }

        async fn archive_thread(
            &self,
            user_id: i64,
            messages: &[ArchivedMessage],
        ) -> Result<Thread, RepositoryError> {
            let mut threads = self.threads.lock().unwrap();
            threads.push((user_id, messages.to_vec()));
            Ok(Thread {
                id: threads.len() as i64,
                user_id,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
        }
    }

    /// Repository double whose first N writes fail with a connection error.
    struct FlakyRepo {
        inner: StubRepo,
        failures_left: AtomicUsize,
    }

    impl FlakyRepo {
        fn failing_once(known_user: i64) -> Self {
            Self {
                inner: StubRepo::new(known_user),
                failures_left: AtomicUsize::new(1),
            }
        }
    }

    impl ArchiveRepository for FlakyRepo {
        async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, RepositoryError> {
            self.inner.find_user(user_id).await
        }

        async fn archive_thread(
            &self,
            user_id: i64,
            messages: &[ArchivedMessage],
        ) -> Result<Thread, RepositoryError> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(RepositoryError::Connection);
            }
            self.inner.archive_thread(user_id, messages).await
        }
    }

    fn snapshot(user_id: i64) -> (String, SessionMetadata, Vec<SessionEntry>) {
        let sid = keys::session_id(user_id, 1_700_000_000_000);
        let metadata = SessionMetadata::new(&sid, user_id, 1_700_000_000_000);
        let entries = vec![
            SessionEntry::user("hi"),
            SessionEntry::assistant("hello"),
            SessionEntry::user("bye"),
        ];
        (sid, metadata, entries)
    }

    #[tokio::test]
    async fn archives_thread_with_all_messages_in_order() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, metadata, entries) = snapshot(42);

        let outcome = archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));

        let threads = archiver.repo().threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        let (user_id, messages) = &threads[0];
        assert_eq!(*user_id, 42);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[0].content, "hi");
        assert_eq!(messages[2].content, "bye");
    }

    #[tokio::test]
    async fn second_call_is_fenced_out() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, metadata, entries) = snapshot(42);

        let first = archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        let second = archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        assert!(matches!(first, ArchiveOutcome::Archived(_)));
        assert!(matches!(second, ArchiveOutcome::AlreadyArchived));
        assert_eq!(archiver.repo().threads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_produce_one_thread() {
        let archiver = Arc::new(Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42)));
        let (sid, metadata, entries) = snapshot(42);

        let a = {
            let archiver = Arc::clone(&archiver);
            let (sid, metadata, entries) = (sid.clone(), metadata.clone(), entries.clone());
            tokio::spawn(async move { archiver.archive_once(&sid, &metadata, &entries).await })
        };
        let b = {
            let archiver = Arc::clone(&archiver);
            let (sid, metadata, entries) = (sid.clone(), metadata.clone(), entries.clone());
            tokio::spawn(async move { archiver.archive_once(&sid, &metadata, &entries).await })
        };

        let (ra, rb) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        let archived = [&ra, &rb]
            .iter()
            .filter(|o| matches!(o, ArchiveOutcome::Archived(_)))
            .count();
        assert_eq!(archived, 1, "exactly one caller must win the claim");
        assert_eq!(archiver.repo().threads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_snapshot_is_skipped_without_claiming() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, metadata, _) = snapshot(42);

        let outcome = archiver.archive_once(&sid, &metadata, &[]).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Skipped));
        // The claim is still available for a later non-empty snapshot.
        let outcome = archiver
            .archive_once(&sid, &metadata, &[SessionEntry::user("hi")])
            .await
            .unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
    }

    #[tokio::test]
    async fn failed_durable_write_releases_the_claim() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), FlakyRepo::failing_once(42));
        let (sid, metadata, entries) = snapshot(42);

        let err = archiver.archive_once(&sid, &metadata, &entries).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::Repository(RepositoryError::Connection)
        ));
        assert!(archiver.repo().inner.threads.lock().unwrap().is_empty());

        // The claim was released, so a retry archives instead of being
        // fenced out.
        let outcome = archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
        assert_eq!(archiver.repo().inner.threads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_user_failure_also_releases_the_claim() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, _, entries) = snapshot(42);
        let wrong_owner = SessionMetadata::new(&sid, 99, 1_700_000_000_000);

        let err = archiver
            .archive_once(&sid, &wrong_owner, &entries)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChatError::Repository(RepositoryError::NotFound)
        ));

        let (_, metadata, _) = snapshot(42);
        let outcome = archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        assert!(matches!(outcome, ArchiveOutcome::Archived(_)));
    }

    #[tokio::test]
    async fn unknown_user_fails_archival() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, metadata, entries) = snapshot(99);

        let err = archiver.archive_once(&sid, &metadata, &entries).await.unwrap_err();
        assert!(matches!(
            err,
            ChatError::Repository(RepositoryError::NotFound)
        ));
        assert!(archiver.repo().threads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_roles_map_to_user() {
        let archiver = Archiver::new(Arc::new(StubCache::new()), StubRepo::new(42));
        let (sid, metadata, _) = snapshot(42);
        let entries = vec![SessionEntry::new("tool", "output")];

        archiver.archive_once(&sid, &metadata, &entries).await.unwrap();
        let threads = archiver.repo().threads.lock().unwrap();
        assert_eq!(threads[0].1[0].role, MessageRole::User);
    }

    #[test]
    fn synthesized_metadata_from_session_id() {
        let meta = synthesize_metadata("thread_42_1700000000000").unwrap();
        assert_eq!(meta.user_id, 42);
        assert_eq!(meta.started_at, 1_700_000_000_000);
        assert!(synthesize_metadata("garbage").is_none());
    }

    #[test]
    fn eviction_value_variants() {
        // CacheValue is part of this crate's public surface; keep variants stable.
        let _ = CacheValue::Text("x".to_string());
        let _ = CacheValue::List(vec!["a".to_string()]);
    }
}
