use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::phone_from_chat_id;

pub const INCOMING_MESSAGE: &str = "incomingMessageReceived";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub instance_id: String,
    pub message_id: String,
    pub chat_id: String,
    pub phone_number: String,
    pub sender_name: Option<String>,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    IncomingText(IncomingMessage),
    /// Acknowledged but not processed: status callbacks, media, group chats.
    Ignored {
        type_webhook: String,
        reason: &'static str,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWebhook {
    type_webhook: Option<String>,
    instance_data: Option<RawInstanceData>,
    timestamp: Option<i64>,
    id_message: Option<String>,
    sender_data: Option<RawSenderData>,
    message_data: Option<RawMessageData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInstanceData {
    id_instance: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSenderData {
    chat_id: Option<String>,
    sender_name: Option<String>,
    chat_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessageData {
    type_message: Option<String>,
    text_message_data: Option<RawTextMessage>,
    extended_text_message_data: Option<RawExtendedText>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTextMessage {
    text_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawExtendedText {
    text: Option<String>,
}

/// Validates a Green API webhook body and extracts the guest text message it
/// carries, if any.
pub fn parse_webhook(body: Value) -> Result<WebhookEvent, WebhookError> {
    if !body.is_object() {
        return Err(WebhookError::Malformed("expected a JSON object".to_string()));
    }
    let raw: RawWebhook =
        serde_json::from_value(body).map_err(|e| WebhookError::Malformed(e.to_string()))?;

    let type_webhook = raw
        .type_webhook
        .filter(|t| !t.is_empty())
        .ok_or(WebhookError::MissingField("typeWebhook"))?;
    if type_webhook != INCOMING_MESSAGE {
        return Ok(WebhookEvent::Ignored {
            type_webhook,
            reason: "not an incoming message",
        });
    }

    let instance_id = raw
        .instance_data
        .and_then(|data| data.id_instance)
        .and_then(|id| match id {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s),
            _ => None,
        })
        .ok_or(WebhookError::MissingField("instanceData.idInstance"))?;
    let message_id = raw
        .id_message
        .filter(|id| !id.is_empty())
        .ok_or(WebhookError::MissingField("idMessage"))?;
    let sender = raw
        .sender_data
        .ok_or(WebhookError::MissingField("senderData"))?;
    let chat_id = sender
        .chat_id
        .filter(|id| !id.is_empty())
        .ok_or(WebhookError::MissingField("senderData.chatId"))?;
    let message = raw
        .message_data
        .ok_or(WebhookError::MissingField("messageData"))?;
    let type_message = message
        .type_message
        .ok_or(WebhookError::MissingField("messageData.typeMessage"))?;

    let text = match type_message.as_str() {
        "textMessage" => message.text_message_data.and_then(|d| d.text_message),
        "extendedTextMessage" => message.extended_text_message_data.and_then(|d| d.text),
        _ => {
            return Ok(WebhookEvent::Ignored {
                type_webhook,
                reason: "not a text message",
            });
        }
    };
    let Some(text) = text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) else {
        return Ok(WebhookEvent::Ignored {
            type_webhook,
            reason: "empty text",
        });
    };

    let Some(phone_number) = phone_from_chat_id(&chat_id) else {
        return Ok(WebhookEvent::Ignored {
            type_webhook,
            reason: "not a personal chat",
        });
    };

    let received_at = raw
        .timestamp
        .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now);

    Ok(WebhookEvent::IncomingText(IncomingMessage {
        instance_id,
        message_id,
        chat_id,
        phone_number,
        sender_name: sender
            .sender_name
            .or(sender.chat_name)
            .filter(|n| !n.is_empty()),
        text,
        received_at,
    }))
}
