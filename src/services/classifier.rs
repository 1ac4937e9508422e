//! Classifier client.
//!
//! Sends normalized email content to the configured LLM provider and turns
//! the reply into a [`Classification`]. Every failure class (transport,
//! timeout, unparseable reply, schema violation) is retried with exponential
//! backoff; once attempts are exhausted the result is
//! [`Classification::Failed`], never an error.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::config::ClassifierSettings;
use crate::domain::{Classification, SCORE_MAX, SCORE_MIN};
use crate::providers::ai::{CompletionRequest, LlmError, LlmProvider};

/// Instruction sent with every classification request.
pub const SYSTEM_PROMPT: &str = "You triage email. Rate the message on two integer scales from 0 to 10.\n\
importance_score: how much the recipient needs to read or act on it (10 = urgent and personal).\n\
spam_score: how likely it is unsolicited bulk, marketing, or phishing (10 = certainly spam).\n\
Reply with only a JSON object with exactly these two fields and no other text, for example:\n\
{\"importance_score\": 3, \"spam_score\": 1}";

/// Upper bound on any single backoff delay.
const MAX_DELAY: Duration = Duration::from_secs(300);

/// Tokens requested for the reply; the expected object is tiny.
const MAX_REPLY_TOKENS: u32 = 100;

/// Why a single classification attempt failed.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("reply contains no JSON object")]
    NoJson,

    #[error("reply does not match schema: {0}")]
    Schema(String),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScoreReply {
    importance_score: i64,
    spam_score: i64,
}

/// Attempt budget and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, at least one.
    pub attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Bound on each individual request.
    pub timeout: Duration,
}

impl RetryPolicy {
    /// Policy described by an account's classifier settings.
    pub fn from_settings(settings: &ClassifierSettings) -> Self {
        Self {
            attempts: settings.retry_attempts.max(1),
            base_delay: settings.retry_delay(),
            timeout: settings.timeout(),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(MAX_DELAY)
            .min(MAX_DELAY)
    }
}

/// Scores email content through a remote model.
pub struct ClassifierClient {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    temperature: f32,
}

impl ClassifierClient {
    /// Creates a client using the account's model parameters.
    pub fn new(provider: Arc<dyn LlmProvider>, settings: &ClassifierSettings) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from_settings(settings),
            temperature: settings.temperature,
        }
    }

    /// Creates a client with an explicit policy.
    pub fn with_policy(provider: Arc<dyn LlmProvider>, policy: RetryPolicy, temperature: f32) -> Self {
        Self {
            provider,
            policy,
            temperature,
        }
    }

    /// Classifies `content`, retrying per policy.
    pub async fn classify(&self, content: &str) -> Classification {
        let request = self.build_request(content);
        let mut last_error = String::new();

        for attempt in 1..=self.policy.attempts {
            match self.attempt(&request).await {
                Ok((importance, spam)) => {
                    if attempt > 1 {
                        tracing::debug!(
                            provider = %self.provider.name(),
                            attempt,
                            "classification succeeded after retry"
                        );
                    }
                    return Classification::Scored { importance, spam };
                }
                Err(err) => {
                    last_error = err.to_string();
                    if attempt == self.policy.attempts {
                        break;
                    }

                    let mut delay = self.policy.delay_before(attempt);
                    if let AttemptError::Llm(LlmError::RateLimited {
                        retry_after_secs: Some(secs),
                    }) = &err
                    {
                        delay = delay.max(Duration::from_secs(*secs)).min(MAX_DELAY);
                    }

                    tracing::warn!(
                        provider = %self.provider.name(),
                        model = %self.provider.model(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "classification attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        tracing::error!(
            provider = %self.provider.name(),
            model = %self.provider.model(),
            attempts = self.policy.attempts,
            error = %last_error,
            "classification failed after all attempts"
        );

        Classification::Failed {
            attempts: self.policy.attempts,
            last_error,
        }
    }

    fn build_request(&self, content: &str) -> CompletionRequest {
        CompletionRequest::new(SYSTEM_PROMPT, content)
            .with_temperature(self.temperature)
            .with_max_tokens(MAX_REPLY_TOKENS)
    }

    async fn attempt(&self, request: &CompletionRequest) -> Result<(u8, u8), AttemptError> {
        let response = tokio::time::timeout(self.policy.timeout, self.provider.complete(request))
            .await
            .map_err(|_| AttemptError::Timeout(self.policy.timeout))??;

        if let Some(usage) = response.usage {
            tracing::trace!(
                provider = %self.provider.name(),
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "classifier reply"
            );
        }
        if response.truncated {
            tracing::debug!(provider = %self.provider.name(), "classifier reply hit the token limit");
        }

        parse_scores(&response.text)
    }
}

/// Extracts and validates the score object from a model reply.
///
/// The reply may wrap the object in prose or code fences; the span from the
/// first `{` to the last `}` is parsed.
pub fn parse_scores(reply: &str) -> Result<(u8, u8), AttemptError> {
    let start = reply.find('{').ok_or(AttemptError::NoJson)?;
    let end = reply.rfind('}').ok_or(AttemptError::NoJson)?;
    if end < start {
        return Err(AttemptError::NoJson);
    }

    let parsed: ScoreReply = serde_json::from_str(&reply[start..=end])
        .map_err(|e| AttemptError::Schema(e.to_string()))?;

    Ok((
        bounded("importance_score", parsed.importance_score)?,
        bounded("spam_score", parsed.spam_score)?,
    ))
}

fn bounded(field: &str, value: i64) -> Result<u8, AttemptError> {
    if (i64::from(SCORE_MIN)..=i64::from(SCORE_MAX)).contains(&value) {
        // In range, so the cast cannot truncate.
        Ok(value as u8)
    } else {
        Err(AttemptError::Schema(format!(
            "{} = {} is outside {}..={}",
            field, value, SCORE_MIN, SCORE_MAX
        )))
    }
}
