//! Model provider seam.
//!
//! Classification is a single exchange: one instruction, one piece of email
//! content, one short reply. [`LlmProvider`] is that exchange; the concrete
//! providers translate it to their wire format.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by a provider call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} returned HTTP {status}: {message}")]
    Status {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{provider} rejected the credentials: {message}")]
    Unauthorized {
        provider: &'static str,
        message: String,
    },

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("unexpected reply body: {0}")]
    Malformed(String),

    #[error("no API key: environment variable `{0}` is not set")]
    MissingApiKey(String),
}

/// Result type for provider calls.
pub type LlmResult<T> = Result<T, LlmError>;

/// One instruction-plus-content exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Fixed instruction, sent as the system prompt.
    pub instruction: String,
    /// Email content to judge, sent as the user turn.
    pub content: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the provider to constrain the reply to a JSON object where it can.
    pub expect_json: bool,
}

impl CompletionRequest {
    pub fn new(instruction: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            content: content.into(),
            temperature: 0.0,
            max_tokens: 256,
            expect_json: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Reply to a [`CompletionRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub usage: Option<TokenUsage>,
    /// Generation stopped at the token limit.
    pub truncated: bool,
}

impl CompletionResponse {
    /// Builds a response carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            truncated: false,
        }
    }
}

/// A remote model (OpenAI-compatible, Anthropic, Ollama).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider family, for logs.
    fn name(&self) -> &str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Sends one exchange and returns the reply.
    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse>;
}

/// Builds an HTTP client whose every request is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> LlmResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Converts a non-success HTTP response into an [`LlmError`].
pub(crate) async fn error_from_response(
    provider: &'static str,
    response: reqwest::Response,
) -> LlmError {
    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return LlmError::RateLimited {
            retry_after_secs: retry_after(response.headers()),
        };
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no reason").to_string());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            LlmError::Unauthorized { provider, message }
        }
        _ => LlmError::Status {
            provider,
            status: status.as_u16(),
            message,
        },
    }
}

/// Seconds from a `Retry-After` header, when given as a number.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Pulls the message out of `{"error": {"message": ..}}` or `{"error": ".."}`.
fn error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .get("message")
        .and_then(|m| m.as_str())
        .or_else(|| error.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn request_builder() {
        let request = CompletionRequest::new("Score it", "Subject: hi")
            .with_temperature(0.5)
            .with_max_tokens(100);

        assert_eq!(request.instruction, "Score it");
        assert_eq!(request.content, "Subject: hi");
        assert_eq!(request.temperature, 0.5);
        assert_eq!(request.max_tokens, 100);
        assert!(request.expect_json);
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(r#"{"error": {"message": "bad key", "type": "auth"}}"#).as_deref(),
            Some("bad key")
        );
        assert_eq!(
            error_message(r#"{"error": "model not found"}"#).as_deref(),
            Some("model not found")
        );
        assert_eq!(error_message("<html>502</html>"), None);
    }

    #[test]
    fn retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after(&headers), Some(12));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }

    #[test]
    fn text_response() {
        let response = CompletionResponse::text("{}");
        assert_eq!(response.text, "{}");
        assert!(!response.truncated);
        assert!(response.usage.is_none());
    }
}
