//! Claude API client for the live support chat
//!
//! Each chat message is answered on its own with a fixed support persona;
//! no conversation history is kept server-side.

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::retry::{is_retryable_status, Retryable};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";
const CHAT_MAX_TOKENS: i32 = 512;

pub const CHAT_PERSONA: &str = "You are the live chat assistant for ClearCall, a customer \
complaint service. Help customers describe their issue, explain how voice complaints are \
processed, and suggest next steps. Be concise, friendly and honest; if you cannot resolve \
something, tell the customer a human agent will follow up.";

/// Claude API client
#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct ClaudeApiRequest<'a> {
    model: &'a str,
    max_tokens: i32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    error: ClaudeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ClaudeErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Response from the Claude API
#[derive(Debug, Clone)]
pub struct ClaudeResponse {
    pub text: String,
    pub stop_reason: Option<String>,
}

impl ClaudeResponse {
    /// The reply ran into the token limit and is cut off
    pub fn is_truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

impl ClaudeClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Send a message to Claude and get a response
    pub async fn send_message(
        &self,
        system_prompt: Option<&str>,
        messages: Vec<Message>,
        max_tokens: i32,
        temperature: Option<f64>,
    ) -> Result<ClaudeResponse, ClaudeApiError> {
        let request = ClaudeApiRequest {
            model: &self.model,
            max_tokens,
            messages,
            system: system_prompt,
            temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&request)
            .send()
            .await
            .map_err(|e| ClaudeApiError::NetworkError(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ClaudeApiError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            let (message, error_type) = match serde_json::from_str::<ClaudeError>(&body) {
                Ok(error) => (error.error.message, error.error.error_type),
                Err(_) => (body, "unknown".to_string()),
            };
            return Err(ClaudeApiError::ApiError {
                status: status.as_u16(),
                message,
                error_type,
            });
        }

        parse_response(&body)
    }

    /// Answer one live chat message in the support persona
    pub async fn chat_reply(&self, message: &str) -> Result<String, ClaudeApiError> {
        let response = self
            .send_message(Some(CHAT_PERSONA), vec![Message::user(message)], CHAT_MAX_TOKENS, Some(0.7))
            .await?;
        if response.is_truncated() {
            tracing::warn!(max_tokens = CHAT_MAX_TOKENS, "Live chat reply truncated at the token limit");
        }
        Ok(response.text)
    }
}

fn parse_response(body: &str) -> Result<ClaudeResponse, ClaudeApiError> {
    let api_response: ClaudeApiResponse =
        serde_json::from_str(body).map_err(|e| ClaudeApiError::ParseError(e.to_string()))?;

    // Concatenate text blocks, skipping tool use and the like
    let text = api_response
        .content
        .into_iter()
        .filter(|block| block.content_type == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");

    Ok(ClaudeResponse {
        text,
        stop_reason: api_response.stop_reason,
    })
}

/// Errors that can occur when calling the Claude API
#[derive(Debug, thiserror::Error)]
pub enum ClaudeApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error ({status}): {message} (type: {error_type})")]
    ApiError {
        status: u16,
        message: String,
        error_type: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl Retryable for ClaudeApiError {
    fn is_retryable(&self) -> bool {
        match self {
            ClaudeApiError::NetworkError(_) => true,
            // 529 is Anthropic's "overloaded"
            ClaudeApiError::ApiError { status, .. } => is_retryable_status(*status),
            ClaudeApiError::ParseError(_) => false,
        }
    }
}
