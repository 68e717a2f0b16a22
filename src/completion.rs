//! OpenAI-compatible chat completion client

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use live_executor::{CompletionError, CompletionService};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::config::CompletionConfig;

/// Completion and vision client for a `/chat/completions` endpoint.
pub struct HttpCompletionClient {
    client: Client,
    api_base: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build completion HTTP client")?;
        Ok(Self {
            client,
            api_base: config.endpoint().trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    async fn chat(&self, content: JsonValue) -> Result<String, CompletionError> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = ChatRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|err| CompletionError::Request(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<response unavailable>".to_string());
            return Err(CompletionError::Request(format!(
                "completion endpoint returned {status}: {text}"
            )));
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| CompletionError::Unparsable(err.to_string()))?;
        let reply = first_choice_text(payload)?;
        debug!(model = %self.model, chars = reply.len(), "Completion received");
        Ok(reply)
    }
}

#[async_trait]
impl CompletionService for HttpCompletionClient {
    async fn generate(&self, prompt: &str) -> Result<String, CompletionError> {
        self.chat(JsonValue::String(prompt.to_string())).await
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, CompletionError> {
        self.chat(image_content(prompt, image_base64)).await
    }
}

/// Text part followed by the screenshot as a PNG data URL.
fn image_content(prompt: &str, image_base64: &str) -> JsonValue {
    json!([
        { "type": "text", "text": prompt },
        {
            "type": "image_url",
            "image_url": { "url": format!("data:image/png;base64,{image_base64}") }
        }
    ])
}

fn first_choice_text(payload: ChatResponse) -> Result<String, CompletionError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| CompletionError::Unparsable("response held no message content".to_string()))
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: JsonValue,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
