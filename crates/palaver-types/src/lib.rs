//! Shared domain types for Palaver.
//!
//! Wire shapes for the ephemeral session cache, durable thread/message
//! entities, completion turns, error enums, and configuration. This crate
//! has no IO dependencies; everything else in the workspace builds on it.

pub mod archive;
pub mod completion;
pub mod config;
pub mod error;
pub mod session;
