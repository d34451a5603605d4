//! GeminiProvider -- concrete [`CompletionProvider`] implementation for the
//! Gemini generateContent API.
//!
//! Gemini has no `assistant` or `system` role: assistant turns are sent as
//! `model`, everything else as `user`. A well-formed HTTP response with a
//! malformed envelope degrades to a fixed fallback reply instead of an
//! error, so one odd response never fails the whole conversation turn.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

use palaver_core::completion::CompletionProvider;
use palaver_types::completion::ChatTurn;
use palaver_types::config::CompletionConfig;
use palaver_types::error::CompletionError;

/// Reply returned when the provider answers 2xx but the envelope carries no
/// extractable text.
const FALLBACK_REPLY: &str = "No response received";

/// Gemini completion provider.
///
/// Implements [`CompletionProvider`] for the generateContent endpoint. The
/// request deadline is enforced by the underlying HTTP client, configured
/// from [`CompletionConfig::timeout_secs`] (30 s by default).
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(api_key: SecretString, config: &CompletionConfig) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| CompletionError::Provider(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.clone(),
            model: config.model.clone(),
        })
    }

    /// The model this provider sends requests to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    /// Convert ordered history into the Gemini request envelope.
    fn to_gemini_request(history: &[ChatTurn]) -> GeminiRequest {
        let contents = history
            .iter()
            .map(|turn| GeminiContent {
                // Gemini's role vocabulary is {user, model}; system turns
                // are carried as user turns.
                role: match turn.role.as_str() {
                    "assistant" => "model",
                    _ => "user",
                }
                .to_string(),
                parts: vec![GeminiPart {
                    text: turn.content.clone(),
                }],
            })
            .collect();

        GeminiRequest { contents }
    }

    /// Pull the first candidate's first text part out of a response body.
    fn extract_text(response: GeminiResponse) -> Option<String> {
        response
            .candidates?
            .into_iter()
            .next()?
            .content?
            .parts?
            .into_iter()
            .next()?
            .text
    }
}

// GeminiProvider intentionally does NOT derive Debug; the SecretString
// field already shields the key, but we omit Debug entirely.

impl CompletionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, history: &[ChatTurn]) -> Result<String, CompletionError> {
        let body = Self::to_gemini_request(history);
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url, self.model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CompletionError::Timeout
                } else {
                    CompletionError::Provider(format!("HTTP request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(CompletionError::Http {
                status: status.as_u16(),
                body: error_body,
            });
        }

        let envelope: GeminiResponse = response
            .json()
            .await
            .map_err(|e| CompletionError::Deserialization(format!("failed to parse response: {e}")))?;

        Ok(Self::extract_text(envelope).unwrap_or_else(|| {
            warn!(model = %self.model, "response envelope carried no text, using fallback reply");
            FALLBACK_REPLY.to_string()
        }))
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

/// Response envelope with every field optional, so partial or unexpected
/// bodies deserialize cleanly and fall through to the fallback reply.
#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    parts: Option<Vec<GeminiResponsePart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}
