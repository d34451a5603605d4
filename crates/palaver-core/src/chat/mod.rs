//! Session store: find-or-create, append, TTL refresh, completion, closure.

pub mod locator;
pub mod service;

pub use service::ChatService;
