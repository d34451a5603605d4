use thiserror::Error;

/// Errors from the session cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Errors from repository operations (used by trait definitions in palaver-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,
}

/// Errors from a completion provider.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,

    #[error("completion provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("completion provider error: {0}")]
    Provider(String),

    #[error("failed to parse completion response: {0}")]
    Deserialization(String),
}

/// Top-level errors surfaced by the chat service.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("could not resolve an active session for user {user_id}")]
    SessionUnresolvable { user_id: i64 },
}
