//! Completion provider port.
//!
//! The chat service hands a provider the full ordered history and expects a
//! single text reply within the provider's own deadline (30 s by default).
//! Implementations live in palaver-infra (e.g., `GeminiProvider`).

use palaver_types::completion::ChatTurn;
use palaver_types::error::CompletionError;

/// Trait for completion backends.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition). The provider
/// owns role-vocabulary mapping and response-envelope extraction; a
/// malformed envelope degrades to a fixed fallback reply rather than an
/// error, while timeouts and non-2xx responses surface as
/// [`CompletionError`].
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name (e.g., "gemini").
    fn name(&self) -> &str;

    /// Generate a reply for the given ordered history.
    fn complete(
        &self,
        history: &[ChatTurn],
    ) -> impl std::future::Future<Output = Result<String, CompletionError>> + Send;
}
