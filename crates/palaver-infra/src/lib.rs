//! Infrastructure layer for Palaver.
//!
//! Contains implementations of the ports defined in `palaver-core`: the
//! in-memory TTL session cache with its eviction feed, the SQLite archive
//! repository (split reader/writer pools, WAL), and the Gemini completion
//! provider.

pub mod llm;
pub mod memory;
pub mod sqlite;
