//! Chat-completion client for OpenAI-compatible APIs.
//!
//! A single request/response call with no retries or streaming. Every
//! failure is turned into a message suitable for showing to the user.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 1000;

/// Why a chat completion failed. The `Display` text is user-facing.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("I need an OpenAI API key to respond to messages. Please set up your OpenAI API key in the Configuration page.")]
    MissingKey,

    #[error("OpenAI rejected the API key. Please check your OpenAI API key in the Configuration page.")]
    Authentication,

    #[error("OpenAI is rate limiting requests right now. Please wait a moment and try again.")]
    RateLimited,

    #[error("The request to OpenAI timed out. Please try again.")]
    Timeout,

    #[error("Could not connect to the OpenAI API. Please check your network connection.")]
    Connection,

    #[error("OpenAI returned an empty response. Please try rephrasing your message.")]
    EmptyResponse,

    #[error("OpenAI API error: {0}")]
    Api(String),

    #[error("Error communicating with OpenAI: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout
        } else if err.is_connect() {
            ChatError::Connection
        } else {
            ChatError::Transport(err.without_url().to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Chat-completion client.
#[derive(Debug, Clone)]
pub struct LlmClient {
    client: Client,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// Creates a client for the OpenAI API with a 60 second timeout.
    pub fn new(api_key: Option<SecretString>) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "Failed to build HTTP client; using defaults");
                Client::new()
            });

        Self {
            client,
            api_key,
            base_url: OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Replace the API key. Cloning a client and swapping its key keeps the
    /// underlying connection pool.
    pub fn with_api_key(mut self, api_key: Option<SecretString>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `user_message` and return the assistant's reply.
    pub async fn complete(&self, user_message: &str) -> Result<String, ChatError> {
        let api_key = self
            .api_key
            .as_ref()
            .filter(|key| !key.expose_secret().is_empty())
            .ok_or_else(|| {
                tracing::warn!("No OpenAI API key provided");
                ChatError::MissingKey
            })?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: user_message,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::status_error(status, response).await);
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(ChatError::EmptyResponse)
    }

    async fn status_error(status: StatusCode, response: reqwest::Response) -> ChatError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Authentication,
            StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ChatError::Timeout,
            _ => {
                let message = match response.json::<ErrorResponse>().await {
                    Ok(body) => body.error.message,
                    Err(_) => status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                };
                ChatError::Api(message)
            }
        }
    }

    /// Like [`LlmClient::complete`], but errors become their user-facing text.
    pub async fn generate_response(&self, user_message: &str) -> String {
        match self.complete(user_message).await {
            Ok(reply) => reply,
            Err(err) => {
                tracing::error!(error = %err, "Error generating chat response");
                err.to_string()
            }
        }
    }
}
