//! Business logic and port definitions for Palaver.
//!
//! This crate owns the ephemeral-to-durable handoff: the cache key scheme,
//! the session store, the archive-once guard, and the eviction notifier.
//! It defines the "ports" (`SessionCache`, `ArchiveRepository`,
//! `CompletionProvider`) that the infrastructure layer implements. It
//! depends only on `palaver-types` -- never on `palaver-infra` or any
//! database/IO crate.

pub mod archive;
pub mod cache;
pub mod chat;
pub mod completion;
pub mod keys;
pub mod notifier;
