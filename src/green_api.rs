pub mod client;
pub mod webhook;

pub use client::GreenApiClient;
pub use webhook::{IncomingMessage, WebhookError, WebhookEvent, parse_webhook};

use std::fmt;

use async_trait::async_trait;

use crate::gateway::GatewayError;

/// Per-hotel Green API credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct GreenApiInstance {
    pub id: String,
    token: String,
}

impl GreenApiInstance {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for GreenApiInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GreenApiInstance")
            .field("id", &self.id)
            .field("token", &"[redacted]")
            .finish()
    }
}

/// Outbound side of the WhatsApp transport.
#[async_trait]
pub trait WhatsAppGateway: Send + Sync {
    /// Returns the gateway's message id.
    async fn send_message(
        &self,
        instance: &GreenApiInstance,
        chat_id: &str,
        message: &str,
    ) -> Result<String, GatewayError>;

    /// Authorization state of the instance, e.g. `authorized`.
    async fn instance_state(&self, instance: &GreenApiInstance) -> Result<String, GatewayError>;
}

/// `79001112233@c.us` for a phone number in any common notation.
pub fn chat_id_for_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@c.us")
}

/// Phone digits of a personal chat id; `None` for groups and malformed ids.
pub fn phone_from_chat_id(chat_id: &str) -> Option<String> {
    let digits = chat_id.strip_suffix("@c.us")?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(digits.to_string())
}
