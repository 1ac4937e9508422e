//! Ollama native chat API.
//!
//! Uses `/api/chat` rather than the OpenAI-compatible shim so the reply can
//! be constrained with `format: "json"`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{
    error_from_response, CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult,
    TokenUsage,
};

/// Default Ollama server.
pub const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

const PROVIDER: &str = "ollama";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [Turn<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: Options,
}

#[derive(Debug, Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Reply,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct Reply {
    content: String,
}

/// Provider for a local Ollama server.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaProvider {
    /// Provider for the default localhost server.
    pub fn new(model: impl Into<String>) -> Self {
        Self::with_url(OLLAMA_DEFAULT_URL, model)
    }

    /// Provider for a server at `base_url`.
    pub fn with_url(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Overrides the HTTP client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                Turn {
                    role: "system",
                    content: &request.instruction,
                },
                Turn {
                    role: "user",
                    content: &request.content,
                },
            ],
            stream: false,
            format: request.expect_json.then_some("json"),
            options: Options {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

fn into_completion(reply: ChatResponse) -> CompletionResponse {
    let usage = match (reply.prompt_eval_count, reply.eval_count) {
        (None, None) => None,
        (input, output) => Some(TokenUsage {
            input_tokens: input.unwrap_or_default(),
            output_tokens: output.unwrap_or_default(),
        }),
    };

    CompletionResponse {
        text: reply.message.content,
        usage,
        truncated: reply.done_reason.as_deref() == Some("length"),
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&self.body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(PROVIDER, response).await);
        }

        let reply: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;
        Ok(into_completion(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_requests_json_without_streaming() {
        let provider = OllamaProvider::new("llama3.2");
        let request = CompletionRequest::new("Score", "Subject: hi")
            .with_temperature(0.1)
            .with_max_tokens(64);

        let json = serde_json::to_value(provider.body(&request)).unwrap();

        assert_eq!(json["model"], "llama3.2");
        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["options"]["num_predict"], 64);
        assert_eq!(json["messages"][1]["content"], "Subject: hi");
    }

    #[test]
    fn reply_conversion() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{
                "model": "llama3.2",
                "message": {"role": "assistant", "content": "{\"importance_score\": 2, \"spam_score\": 8}"},
                "done": true,
                "done_reason": "stop",
                "prompt_eval_count": 40,
                "eval_count": 12
            }"#,
        )
        .unwrap();

        let completion = into_completion(reply);
        assert!(completion.text.contains("spam_score"));
        assert!(!completion.truncated);
        assert_eq!(completion.usage.map(|u| u.output_tokens), Some(12));
    }

    #[test]
    fn url_override() {
        let provider = OllamaProvider::with_url("http://192.168.1.100:11434/", "mistral");
        assert_eq!(provider.base_url, "http://192.168.1.100:11434");
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.model(), "mistral");
    }
}
