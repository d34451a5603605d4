//! SQLite persistence: the durable side of the handoff.

pub mod archive;
pub mod pool;

pub use archive::SqliteArchiveRepository;
pub use pool::DatabasePool;
