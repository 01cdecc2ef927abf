use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::config::DeepSeekConfig;
use crate::gateway::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat-completion model used for sentiment scoring and replies.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, GatewayError>;
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

pub struct DeepSeekClient {
    http: Client,
    api_url: String,
    api_key: Option<SecretString>,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl DeepSeekClient {
    pub fn new(config: &DeepSeekConfig) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config
                .api_key
                .as_ref()
                .map(|key| SecretString::from(key.expose_secret().to_owned())),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn request_body(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "stream": false,
        })
    }
}

#[async_trait]
impl LanguageModel for DeepSeekClient {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, GatewayError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| GatewayError::NotConfigured("deepseek.api_key".to_string()))?;

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(api_key.expose_secret())
            .json(&self.request_body(messages))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::status(status, body));
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| GatewayError::Decode("completion has no content".to_string()))?;
        debug!(model = %self.model, chars = content.len(), "DeepSeek completion received");
        Ok(content)
    }
}
