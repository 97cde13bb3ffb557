use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::schema::SchemaConstraint;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const MODEL: &str = "gpt-4o-mini";

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        ProviderError::Transport(err.to_string())
    }
}

/// Everything a text generator needs for one structured-output call.
#[derive(Debug, Clone)]
pub struct ProviderRequest<'a> {
    pub model: &'a str,
    pub system_instruction: &'a str,
    pub user_instruction: &'a str,
    pub schema: &'a SchemaConstraint,
}

/// An external capability that returns a single textual payload conforming
/// to the request's schema.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError>;
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: &'a SchemaConstraint,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    response_format: JsonSchemaFormat<'a>,
}

impl<'a> ChatRequest<'a> {
    fn from_provider_request(request: &ProviderRequest<'a>) -> Self {
        ChatRequest {
            model: request.model,
            messages: vec![
                Message {
                    role: "system",
                    content: request.system_instruction,
                },
                Message {
                    role: "user",
                    content: request.user_instruction,
                },
            ],
            response_format: JsonSchemaFormat {
                kind: "json_schema",
                json_schema: request.schema,
            },
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate(&self, request: &ProviderRequest<'_>) -> Result<String, ProviderError> {
        let body = ChatRequest::from_provider_request(request);

        tracing::debug!(
            model = request.model,
            instruction_len = request.user_instruction.len(),
            "Sending chat completion request"
        );

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(ProviderError::Status { status, body });
        }

        let body = res.text().await?;
        extract_content(&body)
    }
}

fn extract_content(body: &str) -> Result<String, ProviderError> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::InvalidResponse(format!("{}; raw body: {}", e, body)))?;
    let message = &json["choices"][0]["message"];

    if let Some(refusal) = message["refusal"].as_str() {
        return Err(ProviderError::InvalidResponse(format!("model refused: {}", refusal)));
    }

    message["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("missing message content; raw body: {}", body)))
}
