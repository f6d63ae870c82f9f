//! OpenAI API client for complaint transcription and reply generation
//!
//! Speech-to-text goes through the audio transcription endpoint, replies
//! through chat completions seeded with a fixed support persona. Every call
//! is stateless: no conversation history is kept between complaints.

use std::path::Path;

use reqwest::{multipart, Client};
use serde::{Deserialize, Serialize};

use super::pipeline::{ResponseGenerator, Transcriber};
use super::retry::{is_retryable_status, Retryable};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Persona for every generated complaint reply
pub const SUPPORT_PERSONA: &str = "You are ClearCall's customer support assistant. \
A customer has left a voice complaint, transcribed below. Reply directly to the customer: \
acknowledge the problem with empathy, apologise where appropriate, and explain the concrete \
next steps. Keep the tone warm and professional and the reply under 150 words.";

/// OpenAI API client
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, chat_model: String) -> Self {
        Self::with_base_url(api_key, chat_model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, chat_model: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            chat_model,
        }
    }

    /// Turn a non-success response into an `OpenAiError::Api`
    async fn check(response: reqwest::Response) -> Result<reqwest::Response, OpenAiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<OpenAiErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        Err(OpenAiError::Api { status: status.as_u16(), message })
    }

    /// Send role-tagged messages and return the first choice's text
    pub async fn chat(&self, messages: Vec<ChatMessage>) -> Result<String, OpenAiError> {
        let request = ChatCompletionRequest {
            model: &self.chat_model,
            messages,
            temperature: 0.7,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OpenAiError::Network(e.to_string()))?;

        let body = Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| OpenAiError::Network(e.to_string()))?;

        first_choice_text(&body)
    }
}

fn first_choice_text(body: &str) -> Result<String, OpenAiError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| OpenAiError::Parse(e.to_string()))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| OpenAiError::Parse("response contained no choices".to_string()))
}

#[async_trait::async_trait]
impl Transcriber for OpenAiClient {
    async fn transcribe(&self, audio_path: &Path) -> Result<String, OpenAiError> {
        let audio = tokio::fs::read(audio_path)
            .await
            .map_err(|e| OpenAiError::Io(e.to_string()))?;

        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("complaint.wav")
            .to_string();

        tracing::debug!("Transcribing {} ({} bytes)", file_name, audio.len());

        let form = multipart::Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .text("response_format", "text")
            .part("file", multipart::Part::bytes(audio).file_name(file_name));

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| OpenAiError::Network(e.to_string()))?;

        let text = Self::check(response)
            .await?
            .text()
            .await
            .map_err(|e| OpenAiError::Network(e.to_string()))?;

        Ok(text.trim().to_string())
    }
}

#[async_trait::async_trait]
impl ResponseGenerator for OpenAiClient {
    async fn generate(&self, transcript: &str) -> Result<String, OpenAiError> {
        if transcript.trim().is_empty() {
            return Err(OpenAiError::EmptyInput);
        }

        self.chat(vec![
            ChatMessage::system(SUPPORT_PERSONA),
            ChatMessage::user(transcript),
        ])
        .await
    }
}

/// Errors that can occur when calling the OpenAI API
#[derive(Debug, thiserror::Error)]
pub enum OpenAiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Could not read audio file: {0}")]
    Io(String),

    #[error("Transcript is empty")]
    EmptyInput,
}

impl Retryable for OpenAiError {
    fn is_retryable(&self) -> bool {
        match self {
            OpenAiError::Network(_) => true,
            OpenAiError::Api { status, .. } => is_retryable_status(*status),
            OpenAiError::Parse(_) | OpenAiError::Io(_) | OpenAiError::EmptyInput => false,
        }
    }
}
