use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::Client;
use serde::Deserialize;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Defines the shape of a chat-style interaction with the generative service.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Individual chat message, compatible with OpenAI compliant providers.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub text: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// Supported chat roles passed to the provider.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// Captures basic token usage metrics associated with a call.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub response_tokens: usize,
    pub total_tokens: usize,
}

/// Full response surface returned to callers.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub token_usage: TokenUsage,
    pub model: String,
}

/// Main entry point for invoking the generative service.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: Option<String>,
    base_url: String,
}

impl LlmClient {
    /// Build a client using environment variables.
    ///
    /// A missing API key is tolerated here and reported on the first call
    /// attempt instead, so the server can boot for flows that never reach
    /// the generative service.
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY").ok();
        let base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client for the generative service")?;

        Ok(Self {
            http,
            api_key,
            base_url,
        })
    }

    /// Execute a chat-completion request against the configured provider.
    pub async fn execute(&self, request: LlmRequest) -> Result<LlmResponse> {
        let Some(api_key) = self.api_key.as_ref() else {
            bail!("OPENAI_API_KEY is not configured but required for generation requests");
        };

        let model = request.model.clone();
        let prompt_tokens = approximate_token_count(
            &request
                .messages
                .iter()
                .map(|m| m.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        );
        let payload = build_payload(&request);

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .context("generative service request failed")?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .context("failed to read response body")?;
        let body: serde_json::Value = serde_json::from_str(&response_text).with_context(|| {
            let preview = if response_text.len() > 500 {
                format!("{}...", &response_text[..500])
            } else {
                response_text.clone()
            };
            format!(
                "failed to parse generative service response as JSON. Response body: {}",
                preview
            )
        })?;
        if !status.is_success() {
            bail!(
                "generative service call failed with status {}: {}",
                status,
                body
            );
        }

        let (text, usage) = extract_text_and_usage(&body)
            .ok_or_else(|| anyhow!("unexpected generative service response payload: {}", body))?;

        let mut token_usage = usage.unwrap_or_default();
        if token_usage.prompt_tokens == 0 {
            token_usage.prompt_tokens = prompt_tokens;
        }
        if token_usage.response_tokens == 0 {
            token_usage.response_tokens = approximate_token_count(&text);
        }
        token_usage.total_tokens = token_usage.prompt_tokens + token_usage.response_tokens;

        Ok(LlmResponse {
            text,
            token_usage,
            model,
        })
    }
}

fn build_payload(request: &LlmRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request
        .messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role.as_str(),
                "content": msg.text,
            })
        })
        .collect();

    let mut payload = serde_json::json!({
        "model": request.model,
        "messages": messages,
    });

    if let Some(temperature) = request.temperature {
        payload["temperature"] = serde_json::json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        payload["max_tokens"] = serde_json::json!(max_tokens);
    }

    payload
}

/// Extract assistant text and optional usage metrics from a chat-completion payload.
fn extract_text_and_usage(value: &serde_json::Value) -> Option<(String, Option<TokenUsage>)> {
    let chat = serde_json::from_value::<ChatCompletionPayload>(value.clone()).ok()?;

    let text = chat
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)?;

    let usage = chat.usage.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_tokens.unwrap_or_default(),
        response_tokens: usage.completion_tokens.unwrap_or_default(),
        total_tokens: usage.total_tokens.unwrap_or_default(),
    });

    Some((text, usage))
}

fn approximate_token_count(input: &str) -> usize {
    if input.trim().is_empty() {
        return 0;
    }
    input
        .split_whitespace()
        .filter(|segment| !segment.is_empty())
        .count()
}

#[derive(Debug, Deserialize)]
struct ChatCompletionPayload {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_chat_completion_payload() {
        let body = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "A calm day overall." } }
            ],
            "usage": { "prompt_tokens": 42, "completion_tokens": 5, "total_tokens": 47 }
        });

        let (text, usage) = extract_text_and_usage(&body).expect("payload should parse");
        assert_eq!(text, "A calm day overall.");

        let usage = usage.expect("usage block present");
        assert_eq!(usage.prompt_tokens, 42);
        assert_eq!(usage.response_tokens, 5);
        assert_eq!(usage.total_tokens, 47);
    }

    #[test]
    fn rejects_payload_without_content() {
        let body = serde_json::json!({ "choices": [] });
        assert!(extract_text_and_usage(&body).is_none());
    }

    #[test]
    fn payload_includes_sampling_controls_when_set() {
        let request = LlmRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::new(MessageRole::User, "hello")],
        )
        .with_temperature(0.7)
        .with_max_tokens(500);

        let payload = build_payload(&request);
        assert_eq!(payload["model"], "gpt-4o-mini");
        assert_eq!(payload["temperature"], 0.7);
        assert_eq!(payload["max_tokens"], 500);
    }

    #[test]
    fn payload_omits_sampling_controls_by_default() {
        let request = LlmRequest::new(
            "gpt-4o-mini",
            vec![ChatMessage::new(MessageRole::User, "hello")],
        );

        let payload = build_payload(&request);
        assert!(payload.get("temperature").is_none());
        assert!(payload.get("max_tokens").is_none());
    }

    #[test]
    fn approximates_token_counts_by_whitespace() {
        assert_eq!(approximate_token_count(""), 0);
        assert_eq!(approximate_token_count("   "), 0);
        assert_eq!(approximate_token_count("one two three"), 3);
    }
}
