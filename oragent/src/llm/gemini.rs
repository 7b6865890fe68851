//! Google Gemini API client implementation
//!
//! Implements the LlmClient trait for the Generative Language API
//! (`models/{model}:generateContent`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::openai::{map_send_error, retry_after_header};
use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Role, StopReason, TokenUsage};

/// Gemini API client
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl GeminiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, LlmError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(%base_url, "GeminiClient::new: called");
        let http = Client::builder().build().map_err(LlmError::Network)?;
        Ok(Self {
            api_key: api_key.into(),
            base_url,
            http,
        })
    }

    /// Build the request body for the Gemini API
    ///
    /// The system prompt travels as `systemInstruction`; assistant turns use
    /// the `model` role.
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(model = %request.model, max_tokens = %request.options.max_output_tokens, "build_request_body: called");
        let contents = request
            .messages
            .iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                serde_json::json!({ "role": role, "parts": [{ "text": msg.content }] })
            })
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.options.temperature,
                "maxOutputTokens": request.options.max_output_tokens,
            },
        });
        if !request.system_prompt.is_empty() {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": request.system_prompt }] });
        }
        body
    }

    /// Parse the Gemini API response
    fn parse_response(&self, api_response: GeminiResponse) -> Result<CompletionResponse, LlmError> {
        debug!(candidate_count = %api_response.candidates.len(), "parse_response: called");
        let usage = api_response.usage_metadata.unwrap_or_default();
        let candidate = api_response.candidates.into_iter().next().ok_or_else(|| {
            LlmError::InvalidResponse("response contained no candidates (prompt may have been blocked)".to_string())
        })?;

        let content = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect::<Vec<_>>().join(""))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content,
            stop_reason: StopReason::from_gemini(candidate.finish_reason.as_deref()),
            usage: TokenUsage {
                input_tokens: usage.prompt_token_count,
                output_tokens: usage.candidates_token_count,
            },
        })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(model = %request.model, "complete: called");
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, request.model);
        let body = self.build_request_body(&request);
        let timeout = request.options.timeout;

        let response = self
            .http
            .post(url)
            .timeout(timeout)
            .header("x-goog-api-key", self.api_key.clone())
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

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
        let api_response: GeminiResponse = serde_json::from_str(&text)?;
        self.parse_response(api_response)
    }
}

// Gemini API response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOptions, Message, ProviderErrorKind};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest::single(
            "gemini-1.5-pro",
            "You are an OR expert",
            "Solve it",
            CompletionOptions::default(),
        )
    }

    #[test]
    fn test_build_request_body() {
        let client = GeminiClient::new("https://generativelanguage.googleapis.com", "key").unwrap();
        let mut req = request();
        req.messages.push(Message::assistant("draft"));
        let body = client.build_request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "You are an OR expert");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "Solve it");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[tokio::test]
    async fn test_complete_sends_key_and_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:generateContent"))
            .and(header("x-goog-api-key", "gk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "part one "}, {"text": "part two"}]},
                    "finishReason": "MAX_TOKENS"
                }],
                "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 6}
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(server.uri(), "gk-test").unwrap();
        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.content, "part one part two");
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.usage.input_tokens, 5);
        assert_eq!(response.usage.output_tokens, 6);
    }

    #[tokio::test]
    async fn test_blocked_prompt_and_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;
        let client = GeminiClient::new(server.uri(), "k").unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;
        let client = GeminiClient::new(server.uri(), "k").unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Transient);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("API key not valid"))
            .mount(&server)
            .await;
        let client = GeminiClient::new(server.uri(), "k").unwrap();
        let err = client.complete(request()).await.unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Permanent);
    }
}
