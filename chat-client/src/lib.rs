//! Minimal OpenAI-compatible chat completions client.
//!
//! This crate provides:
//! - The [`LanguageModel`] trait, the seam every generation engine consumes
//! - [`ChatClient`], a concrete client for OpenAI-compatible providers
//! - Provider presets (DeepSeek, GLM, Kimi) resolved from a model name
//! - Buffered SSE parsing for streaming responses

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_GLM_MAX_TOKENS: usize = 8192;

/// Errors that can occur when talking to a chat backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured: set {0}")]
    NoApiKey(&'static str),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),
}

/// A stream of text fragments from a streaming chat call.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>;

/// A text-generation backend.
///
/// Engines receive an `Arc<dyn LanguageModel>` explicitly; there is no
/// process-wide default client.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and wait for the whole reply.
    async fn chat(&self, prompt: &str, system_prompt: &str) -> Result<String, Error>;

    /// Send one prompt and stream the reply as text fragments.
    async fn stream_chat(&self, prompt: &str, system_prompt: &str) -> Result<TextStream, Error>;

    /// The model identifier requests are sent with.
    fn model_name(&self) -> &str;
}

// ============================================================================
// Providers
// ============================================================================

/// Known OpenAI-compatible providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    DeepSeek,
    Glm,
    Kimi,
}

impl Provider {
    pub fn base_url(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "https://api.deepseek.com",
            Provider::Glm => "https://open.bigmodel.cn/api/paas/v4",
            Provider::Kimi => "https://api.moonshot.cn/v1",
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_var(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
            Provider::Glm => "GLM_API_KEY",
            Provider::Kimi => "MOONSHOT_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::DeepSeek => "deepseek-chat",
            Provider::Glm => "glm-4-plus",
            Provider::Kimi => "kimi-k2.5",
        }
    }

    /// Resolve a provider and concrete model id from a loose model name.
    ///
    /// A bare provider alias ("deepseek", "glm") selects that provider's
    /// default model; any other name is passed through unchanged.
    pub fn resolve(model_name: &str) -> Result<(Provider, String), Error> {
        let trimmed = model_name.trim();
        let name = if trimmed.is_empty() { "deepseek" } else { trimmed };
        let lowered = name.to_lowercase();

        let provider = if lowered.contains("deepseek") {
            Provider::DeepSeek
        } else if lowered.contains("glm") || lowered.contains("zhipu") || lowered.contains("bigmodel") {
            Provider::Glm
        } else if lowered.contains("moonshot") || lowered.contains("kimi") {
            Provider::Kimi
        } else {
            return Err(Error::UnsupportedModel(name.to_string()));
        };

        let model = match lowered.as_str() {
            "deepseek" | "glm" | "kimi" | "moonshot" => provider.default_model().to_string(),
            _ => name.to_string(),
        };
        Ok((provider, model))
    }
}

// ============================================================================
// Client
// ============================================================================

/// Chat completions client for an OpenAI-compatible endpoint.
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    provider: Provider,
    api_key: String,
    model: String,
    max_tokens: Option<usize>,
    temperature: Option<f32>,
    thinking: Option<bool>,
}

impl ChatClient {
    /// Create a client for a provider with an explicit API key.
    pub fn new(provider: Provider, api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let mut this = Self {
            client,
            provider,
            api_key: api_key.into(),
            model: provider.default_model().to_string(),
            max_tokens: None,
            temperature: None,
            thinking: None,
        };
        if provider == Provider::Glm {
            this.apply_glm_env_defaults();
        }
        this
    }

    /// Create a client from a model name, reading the provider's key from the environment.
    pub fn from_model_name(model_name: &str) -> Result<Self, Error> {
        let (provider, model) = Provider::resolve(model_name)?;
        let api_key = std::env::var(provider.api_key_var())
            .map_err(|_| Error::NoApiKey(provider.api_key_var()))?;
        Ok(Self::new(provider, api_key).with_model(model))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Toggle provider-side reasoning (only sent to GLM).
    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking = Some(enabled);
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn apply_glm_env_defaults(&mut self) {
        let thinking = std::env::var("GLM_THINKING_TYPE")
            .unwrap_or_else(|_| "disabled".to_string())
            .trim()
            .to_lowercase();
        self.thinking = match thinking.as_str() {
            "enabled" => Some(true),
            "disabled" => Some(false),
            _ => None,
        };
        self.max_tokens = Some(
            std::env::var("GLM_MAX_TOKENS")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_GLM_MAX_TOKENS),
        );
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    fn build_api_request(&self, prompt: &str, system_prompt: &str, stream: bool) -> ApiRequest {
        let system = if system_prompt.trim().is_empty() {
            DEFAULT_SYSTEM_PROMPT
        } else {
            system_prompt
        };

        let thinking = match (self.provider, self.thinking) {
            (Provider::Glm, Some(enabled)) => Some(ApiThinking {
                r#type: if enabled { "enabled" } else { "disabled" }.to_string(),
            }),
            _ => None,
        };

        ApiRequest {
            model: self.model.clone(),
            messages: vec![
                ApiMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ApiMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            thinking,
            stream,
        }
    }

    async fn send(&self, body: &ApiRequest) -> Result<reqwest::Response, Error> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .post(format!("{}/chat/completions", self.provider.base_url()))
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status, model = %self.model, "chat request rejected");
            return Err(Error::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for ChatClient {
    async fn chat(&self, prompt: &str, system_prompt: &str) -> Result<String, Error> {
        let body = self.build_api_request(prompt, system_prompt, false);
        tracing::debug!(model = %self.model, prompt_chars = prompt.chars().count(), "chat request");

        let response: ApiResponse = self
            .send(&body)
            .await?
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn stream_chat(&self, prompt: &str, system_prompt: &str) -> Result<TextStream, Error> {
        let body = self.build_api_request(prompt, system_prompt, true);
        tracing::debug!(model = %self.model, prompt_chars = prompt.chars().count(), "streaming chat request");

        let response = self.send(&body).await?;

        // Chunks can end mid-line or mid-character; only complete lines are decoded.
        let stream = response
            .bytes_stream()
            .scan(Vec::new(), |buffer: &mut Vec<u8>, result| {
                let fragments = match result {
                    Ok(bytes) => {
                        buffer.extend_from_slice(&bytes);
                        parse_sse_fragments_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(fragments))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Drain a stream of fragments into one string.
pub async fn collect_text(mut stream: TextStream) -> Result<String, Error> {
    let mut text = String::new();
    while let Some(fragment) = stream.next().await {
        text.push_str(&fragment?);
    }
    Ok(text)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ApiThinking>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ApiThinking {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChunk {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiStreamChoice {
    #[serde(default)]
    delta: ApiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse complete SSE lines out of `buffer`, leaving any partial line behind.
///
/// Only non-empty `delta.content` fragments are returned; role headers,
/// reasoning deltas and keep-alives are skipped.
fn parse_sse_fragments_buffered(buffer: &mut Vec<u8>) -> Vec<Result<String, Error>> {
    let mut fragments = Vec::new();

    while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
        let line = String::from_utf8_lossy(&raw[..newline_pos]);
        let line = line.trim_end_matches('\r');

        let Some(json_str) = line.strip_prefix("data:") else {
            continue;
        };
        let json_str = json_str.trim_start();
        if json_str.is_empty() || json_str == "[DONE]" {
            continue;
        }

        match serde_json::from_str::<ApiStreamChunk>(json_str) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            fragments.push(Ok(content));
                        }
                    }
                }
            }
            Err(e) => fragments.push(Err(Error::Parse(format!("SSE parse error: {e}")))),
        }
    }

    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_provider_aliases() {
        let (provider, model) = Provider::resolve("deepseek").unwrap();
        assert_eq!(provider, Provider::DeepSeek);
        assert_eq!(model, "deepseek-chat");

        let (provider, model) = Provider::resolve("glm-4-flash").unwrap();
        assert_eq!(provider, Provider::Glm);
        assert_eq!(model, "glm-4-flash");

        let (provider, _) = Provider::resolve("moonshot-v1-32k").unwrap();
        assert_eq!(provider, Provider::Kimi);

        let (provider, _) = Provider::resolve("").unwrap();
        assert_eq!(provider, Provider::DeepSeek);
    }

    #[test]
    fn test_resolve_unknown_model() {
        assert!(matches!(
            Provider::resolve("llama-3"),
            Err(Error::UnsupportedModel(_))
        ));
    }

    #[test]
    fn test_request_body_glm_thinking() {
        let client = ChatClient::new(Provider::Glm, "key").with_thinking(true);
        let body = client.build_api_request("hi", "", false);
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["thinking"]["type"], "enabled");
        assert_eq!(value["messages"][0]["content"], DEFAULT_SYSTEM_PROMPT);
        assert_eq!(value["messages"][1]["role"], "user");
    }

    #[test]
    fn test_request_body_omits_thinking_for_deepseek() {
        let client = ChatClient::new(Provider::DeepSeek, "key").with_thinking(true);
        let body = client.build_api_request("hi", "be brief", true);
        let value = serde_json::to_value(&body).unwrap();
        assert!(value.get("thinking").is_none());
        assert_eq!(value["stream"], true);
    }

    #[test]
    fn test_sse_fragments_buffered() {
        let mut buffer = b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\
             data: {\"choices\":[{\"delta\":{\"cont"
            .to_vec();
        let fragments: Vec<String> = parse_sse_fragments_buffered(&mut buffer)
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert!(buffer.starts_with(b"data: {\"choices\""));

        buffer.extend_from_slice(b"ent\":\"!\"}}]}\ndata: [DONE]\n");
        let rest: Vec<String> = parse_sse_fragments_buffered(&mut buffer)
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(rest, vec!["!"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_skips_role_only_delta() {
        let mut buffer = b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n".to_vec();
        assert!(parse_sse_fragments_buffered(&mut buffer).is_empty());
    }

    #[test]
    fn test_sse_character_split_across_chunks() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"沈焱笙\"}}]}\n".as_bytes();
        let split = line.windows(3).position(|w| w == "焱".as_bytes()).unwrap() + 1;

        let mut buffer = line[..split].to_vec();
        assert!(parse_sse_fragments_buffered(&mut buffer).is_empty());
        assert_eq!(buffer.len(), split);

        buffer.extend_from_slice(&line[split..]);
        let fragments: Vec<String> = parse_sse_fragments_buffered(&mut buffer)
            .into_iter()
            .map(|f| f.unwrap())
            .collect();
        assert_eq!(fragments, vec!["沈焱笙"]);
        assert!(buffer.is_empty());
    }
}
