//! OpenAI-compatible Chat Completions client
//!
//! Serves both the OpenAI cloud and locally hosted OpenAI-compatible servers
//! (Ollama exposes `/v1/chat/completions`). The local flavor sends no credential.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Role, StopReason, TokenUsage};

/// OpenAI API client
pub struct OpenAIClient {
    api_key: Option<String>,
    base_url: String,
    http: Client,
}

impl OpenAIClient {
    /// Create a client; `api_key` is None for local backends
    ///
    /// SDK-style bases that already end in `/v1` are accepted.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, LlmError> {
        let base_url = base_url.into();
        let trimmed = base_url.trim_end_matches('/');
        let base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();
        debug!(%base_url, has_key = %api_key.is_some(), "OpenAIClient::new: called");
        let http = Client::builder().build().map_err(LlmError::Network)?;
        Ok(Self {
            api_key,
            base_url,
            http,
        })
    }

    /// Build the request body for the OpenAI API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(model = %request.model, max_tokens = %request.options.max_output_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(request.messages.iter().map(|msg| {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            serde_json::json!({
                "role": role,
                "content": msg.content,
            })
        }));

        // GPT-5.x and o1/o3 models use max_completion_tokens and reject temperature
        let reasoning_model =
            request.model.starts_with("gpt-5") || request.model.starts_with("o1") || request.model.starts_with("o3");

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
        });

        if reasoning_model {
            body["max_completion_tokens"] = serde_json::json!(request.options.max_output_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(request.options.max_output_tokens);
            body["temperature"] = serde_json::json!(request.options.temperature);
        }

        body
    }

    /// Parse the OpenAI API response
    fn parse_response(&self, api_response: OpenAIResponse) -> Result<CompletionResponse, LlmError> {
        debug!(choice_count = %api_response.choices.len(), "parse_response: called");
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;

        let usage = api_response.usage.unwrap_or_default();
        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            stop_reason: StopReason::from_openai(choice.finish_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            },
        })
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %request.model, "complete: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);
        let timeout = request.options.timeout;

        let mut builder = self
            .http
            .post(url)
            .timeout(timeout)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| map_send_error(e, timeout))?;
        let status = response.status().as_u16();

        if status == 429 {
            debug!("complete: rate limited (429)");
            return Err(LlmError::RateLimited {
                retry_after: retry_after_header(&response),
            });
        }

        if !response.status().is_success() {
            debug!(%status, "complete: API error");
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message: text });
        }

        debug!("complete: success");
        let text = response.text().await.map_err(|e| map_send_error(e, timeout))?;
        let api_response: OpenAIResponse = serde_json::from_str(&text)?;
        self.parse_response(api_response)
    }
}

/// Turn a reqwest failure into the matching LlmError
pub(super) fn map_send_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        debug!(?timeout, "map_send_error: request timed out");
        LlmError::Timeout(timeout)
    } else {
        LlmError::Network(e)
    }
}

/// Read `retry-after` (seconds), defaulting to 60
pub(super) fn retry_after_header(response: &reqwest::Response) -> Duration {
    let secs = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(60);
    Duration::from_secs(secs)
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOptions, ProviderErrorKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::single(model, "You are helpful", "Hello", CompletionOptions::default())
    }

    #[test]
    fn test_build_request_body_basic() {
        let client = OpenAIClient::new("https://api.openai.com/", Some("test-key".into())).unwrap();
        let body = client.build_request_body(&request("gpt-4o"));

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 4096);
        assert!((body["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "You are helpful");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(client.base_url, "https://api.openai.com");
    }

    #[test]
    fn test_sdk_style_base_url_drops_version_segment() {
        let client = OpenAIClient::new("https://proxy.example.com/v1/", None).unwrap();
        assert_eq!(client.base_url, "https://proxy.example.com");
        let client = OpenAIClient::new("https://proxy.example.com/openai", None).unwrap();
        assert_eq!(client.base_url, "https://proxy.example.com/openai");
    }

    #[test]
    fn test_reasoning_models_use_completion_tokens() {
        let client = OpenAIClient::new("https://api.openai.com", None).unwrap();
        let body = client.build_request_body(&request("o3-mini"));
        assert_eq!(body["max_completion_tokens"], 4096);
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[tokio::test]
    async fn test_complete_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "```python\nprint('RESULT: 1')\n```"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 8}
            })))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), Some("sk-test".into())).unwrap();
        let response = client.complete(request("gpt-4o")).await.unwrap();
        assert!(response.content.contains("RESULT: 1"));
        assert_eq!(response.usage.total(), 20);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[tokio::test]
    async fn test_complete_classifies_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), None).unwrap();
        let err = client.complete(request("gpt-4o")).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Transient);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), None).unwrap();
        let err = client.complete(request("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_complete_rate_limit_reads_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), None).unwrap();
        let err = client.complete(request("gpt-4o")).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_complete_empty_choices_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), None).unwrap();
        let err = client.complete(request("gpt-4o")).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Permanent);
    }

    #[tokio::test]
    async fn test_complete_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = OpenAIClient::new(server.uri(), None).unwrap();
        let mut req = request("gpt-4o");
        req.options.timeout = Duration::from_millis(100);
        let err = client.complete(req).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)), "got {:?}", err);
        assert_eq!(err.kind(), ProviderErrorKind::Transient);
    }
}
