//! In-memory session cache.

pub mod cache;

pub use cache::MemoryCache;
