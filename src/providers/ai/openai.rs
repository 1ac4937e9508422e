//! OpenAI-compatible chat completions.
//!
//! Works with OpenAI and self-hosted endpoints that speak the same API
//! (vLLM, LM Studio, llama.cpp server).

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};

use super::traits::{
    error_from_response, CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult,
    TokenUsage,
};

/// Default base URL for OpenAI API.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

/// Provider for OpenAI-compatible chat-completions APIs.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// Provider for OpenAI's hosted API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::custom(OPENAI_BASE_URL, Some(api_key.into()), model)
    }

    /// Provider for a self-hosted endpoint; the key is optional there.
    pub fn custom(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    /// Overrides the HTTP client (used to apply the request timeout).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, value);
            }
        }
        headers
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.instruction,
                },
                ChatMessage {
                    role: "user",
                    content: &request.content,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.expect_json.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }
}

fn into_completion(reply: ChatResponse) -> LlmResult<CompletionResponse> {
    let choice = reply
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Malformed("no choices in reply".to_string()))?;

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        usage: reply.usage.map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }),
        truncated: choice.finish_reason.as_deref() == Some("length"),
    })
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .headers(self.headers())
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
        into_completion(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_has_system_then_user_and_json_mode() {
        let provider = OpenAiCompatibleProvider::openai("k", "gpt-4o-mini");
        let request = CompletionRequest::new("Score this email", "Subject: hi").with_max_tokens(50);

        let json = serde_json::to_value(provider.body(&request)).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][0]["content"], "Score this email");
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["max_tokens"], 50);
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn json_mode_can_be_off() {
        let provider = OpenAiCompatibleProvider::custom("http://x", None, "m");
        let mut request = CompletionRequest::new("i", "c");
        request.expect_json = false;

        let json = serde_json::to_value(provider.body(&request)).unwrap();
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn reply_conversion() {
        let reply: ChatResponse = serde_json::from_str(
            r#"{
                "choices": [{
                    "message": {"content": "{\"importance_score\": 3, \"spam_score\": 1}"},
                    "finish_reason": "length"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .unwrap();

        let completion = into_completion(reply).unwrap();
        assert!(completion.text.contains("importance_score"));
        assert!(completion.truncated);
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5
            })
        );
    }

    #[test]
    fn empty_choices_is_malformed() {
        let reply: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(into_completion(reply), Err(LlmError::Malformed(_))));
    }

    #[test]
    fn custom_endpoint_trims_slash_and_omits_auth() {
        let provider = OpenAiCompatibleProvider::custom("http://localhost:8000/v1/", None, "qwen2.5");
        assert_eq!(provider.base_url, "http://localhost:8000/v1");
        assert!(provider.headers().get(AUTHORIZATION).is_none());
        assert_eq!(provider.name(), "openai");

        let hosted = OpenAiCompatibleProvider::openai("sk-test", "gpt-4o");
        assert_eq!(
            hosted.headers().get(AUTHORIZATION).map(|v| v.to_str().unwrap()),
            Some("Bearer sk-test")
        );
    }
}
