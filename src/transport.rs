//! The boundary to the hosted language model.
//!
//! [`ModelTransport`] is the only place the pipeline touches the network, so
//! tests swap in a scripted fake. [`HttpTransport`] speaks either the
//! OpenAI-compatible chat completions format or Gemini `generateContent`,
//! picked from the endpoint URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::ModelConfig;
use crate::error::{PilotError, Result};

/// One call to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub prompt: String,
    /// Ask the provider for a JSON-only response.
    pub json_response: bool,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait ModelTransport: Send + Sync {
    /// Returns the raw response text. It may be empty and it may be wrapped
    /// in markdown fences; callers validate it.
    async fn complete(&self, request: &ModelRequest) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    OpenAi,
    Gemini,
}

impl ApiFormat {
    pub fn detect(url: &str) -> Self {
        if url.contains("generativelanguage.googleapis.com") {
            ApiFormat::Gemini
        } else {
            ApiFormat::OpenAi
        }
    }
}

pub struct HttpTransport {
    client: Client,
    api_key: Option<String>,
    api_url: String,
    format: ApiFormat,
}

impl HttpTransport {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone(),
            api_url: config.api_url.clone(),
            format: ApiFormat::detect(&config.api_url),
        }
    }

    pub fn format(&self) -> ApiFormat {
        self.format
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PilotError::Configuration("API key is missing".into()))
    }

    async fn complete_openai(&self, request: &ModelRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(self.api_key()?)
            .json(&openai_body(request))
            .send()
            .await?;

        let json_resp = read_json(response).await?;
        Ok(openai_text(&json_resp))
    }

    async fn complete_gemini(&self, request: &ModelRequest) -> Result<String> {
        let response = self
            .client
            .post(gemini_url(&self.api_url, &request.model))
            .header("x-goog-api-key", self.api_key()?)
            .json(&gemini_body(request))
            .send()
            .await?;

        let json_resp = read_json(response).await?;
        Ok(gemini_text(&json_resp))
    }
}

#[async_trait]
impl ModelTransport for HttpTransport {
    async fn complete(&self, request: &ModelRequest) -> Result<String> {
        debug!(model = %request.model, format = ?self.format, "sending model request");
        match self.format {
            ApiFormat::OpenAi => self.complete_openai(request).await,
            ApiFormat::Gemini => self.complete_gemini(request).await,
        }
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    parse_envelope(status, &text)
}

/// Check the HTTP status and decode the provider's JSON envelope.
///
/// Error statuses surface the provider's `error.message` when it sent one.
fn parse_envelope(status: StatusCode, text: &str) -> Result<Value> {
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or_else(|| "Unknown API error".to_string());
        warn!(%status, %message, "model API error");
        return Err(PilotError::Transport(format!("API error ({status}): {message}")));
    }

    serde_json::from_str(text)
        .map_err(|e| PilotError::Transport(format!("unreadable API envelope: {e}")))
}

fn openai_body(request: &ModelRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": [{"role": "user", "content": request.prompt}],
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if request.json_response {
        body["response_format"] = json!({"type": "json_object"});
    }
    body
}

fn openai_text(json_resp: &Value) -> String {
    json_resp["choices"][0]["message"]["content"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

fn gemini_url(api_url: &str, model: &str) -> String {
    format!("{}/models/{model}:generateContent", api_url.trim_end_matches('/'))
}

fn gemini_body(request: &ModelRequest) -> Value {
    let mut generation_config = json!({});
    if let Some(temperature) = request.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if request.json_response {
        generation_config["responseMimeType"] = json!("application/json");
    }
    json!({
        "contents": [{"parts": [{"text": request.prompt}]}],
        "generationConfig": generation_config,
    })
}

/// Concatenate the text parts of the first candidate.
fn gemini_text(json_resp: &Value) -> String {
    json_resp["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}
