use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("rate limited (429)")]
    RateLimited,

    #[error("completion API error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("completion transport error: {0}")]
    Transport(String),
}

/// A text-completion backend: one prompt in, the generated text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| anyhow::anyhow!("build http client: {err}"))?;
        Ok(Self {
            client,
            endpoint: generate_content_endpoint(base_url, model),
            api_key: api_key.into(),
        })
    }
}

pub fn generate_content_endpoint(base_url: &str, model: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/models/{model}:generateContent")
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|err| CompletionError::Transport(format!("{}: {err}", self.endpoint)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);

        let body = serde_json::json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ]
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|err| CompletionError::Transport(format!("POST {}: {err}", self.endpoint)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|err| CompletionError::Transport(format!("read response body: {err}")))?;

        if status.as_u16() == 429 {
            return Err(CompletionError::RateLimited);
        }
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            return Err(CompletionError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| CompletionError::MalformedResponse(format!("parse body: {err}")))?;
        extract_candidate_text(&value)
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_candidate_text(value: &serde_json::Value) -> Result<String, CompletionError> {
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .map(|text| text.trim().to_owned())
        .ok_or_else(|| {
            CompletionError::MalformedResponse(
                "missing candidates[0].content.parts[0].text".to_owned(),
            )
        })
}
