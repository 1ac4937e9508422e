//! AI/LLM provider implementations.
//!
//! # Supported Providers
//!
//! - **OpenAI-compatible**: OpenAI, vLLM, LM Studio, and other compatible endpoints
//! - **Anthropic**: Claude models via Anthropic's API
//! - **Ollama**: Local LLM inference via Ollama
//!
//! [`from_settings`] builds the provider an account's classifier section
//! names, with the configured timeout applied to its HTTP client.

mod anthropic;
mod ollama;
mod openai;
mod traits;

use std::sync::Arc;

pub use anthropic::{AnthropicProvider, ANTHROPIC_BASE_URL};
pub use ollama::{OllamaProvider, OLLAMA_DEFAULT_URL};
pub use openai::{OpenAiCompatibleProvider, OPENAI_BASE_URL};
pub use traits::{
    http_client, CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult,
    TokenUsage,
};

use crate::config::{ClassifierSettings, ProviderKind};

/// Environment variable consulted for the OpenAI key when none is configured.
pub const OPENAI_KEY_ENV: &str = "OPENAI_API_KEY";
/// Environment variable consulted for the Anthropic key when none is configured.
pub const ANTHROPIC_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Builds the provider described by `settings`.
///
/// A hosted OpenAI endpoint and Anthropic require an API key; a custom
/// OpenAI-compatible `base_url` and Ollama may run without one.
pub fn from_settings(settings: &ClassifierSettings) -> LlmResult<Arc<dyn LlmProvider>> {
    let client = http_client(settings.timeout())?;

    let provider: Arc<dyn LlmProvider> = match settings.provider {
        ProviderKind::OpenAi => {
            let env = settings.api_key_env.as_deref().unwrap_or(OPENAI_KEY_ENV);
            let api_key = std::env::var(env).ok();
            match (&settings.base_url, api_key) {
                (Some(url), key) => Arc::new(
                    OpenAiCompatibleProvider::custom(url.as_str(), key, &settings.model)
                        .with_client(client),
                ),
                (None, Some(key)) => Arc::new(
                    OpenAiCompatibleProvider::openai(key, &settings.model).with_client(client),
                ),
                (None, None) => return Err(LlmError::MissingApiKey(env.to_string())),
            }
        }
        ProviderKind::Anthropic => {
            let env = settings.api_key_env.as_deref().unwrap_or(ANTHROPIC_KEY_ENV);
            let api_key =
                std::env::var(env).map_err(|_| LlmError::MissingApiKey(env.to_string()))?;
            let mut provider = AnthropicProvider::new(api_key, &settings.model).with_client(client);
            if let Some(url) = &settings.base_url {
                provider = provider.with_base_url(url.as_str());
            }
            Arc::new(provider)
        }
        ProviderKind::Ollama => {
            let url = settings.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_URL);
            Arc::new(OllamaProvider::with_url(url, &settings.model).with_client(client))
        }
    };

    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(provider: ProviderKind) -> ClassifierSettings {
        ClassifierSettings {
            provider,
            model: "test-model".to_string(),
            base_url: None,
            api_key_env: None,
            temperature: 0.2,
            retry_attempts: 3,
            retry_delay_seconds: 0.0,
            timeout_seconds: 5,
        }
    }

    #[test]
    fn ollama_needs_no_key() {
        let provider = from_settings(&settings(ProviderKind::Ollama)).unwrap();
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "test-model");
    }

    #[test]
    fn custom_openai_endpoint_needs_no_key() {
        let mut s = settings(ProviderKind::OpenAi);
        s.base_url = Some("http://localhost:8000/v1".to_string());
        s.api_key_env = Some("MAIL_TRIAGE_TEST_UNSET_KEY_1".to_string());

        let provider = from_settings(&s).unwrap();
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn hosted_provider_without_key_fails() {
        let mut s = settings(ProviderKind::Anthropic);
        s.api_key_env = Some("MAIL_TRIAGE_TEST_UNSET_KEY_2".to_string());

        match from_settings(&s) {
            Err(LlmError::MissingApiKey(env)) => assert_eq!(env, "MAIL_TRIAGE_TEST_UNSET_KEY_2"),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected missing key error"),
        }
    }
}
