use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::green_api::GreenApiInstance;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hotel {
    pub id: i64,
    pub name: String,
    pub whatsapp_number: String,
    pub green_api_instance_id: Option<String>,
    #[serde(skip_serializing, default)]
    pub green_api_token: Option<String>,
    pub settings: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Hotel {
    /// Credentials for sending on behalf of this hotel, if both halves are set.
    pub fn green_api_instance(&self) -> Option<GreenApiInstance> {
        match (&self.green_api_instance_id, &self.green_api_token) {
            (Some(id), Some(token)) if !id.is_empty() && !token.is_empty() => {
                Some(GreenApiInstance::new(id.clone(), token.clone()))
            }
            _ => None,
        }
    }

    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings
            .get(key)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(Value::as_bool)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHotel {
    pub name: String,
    pub whatsapp_number: String,
    #[serde(default)]
    pub green_api_instance_id: Option<String>,
    #[serde(default)]
    pub green_api_token: Option<String>,
    #[serde(default = "empty_object")]
    pub settings: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HotelUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub whatsapp_number: Option<String>,
    #[serde(default)]
    pub green_api_instance_id: Option<String>,
    #[serde(default)]
    pub green_api_token: Option<String>,
    #[serde(default)]
    pub settings: Option<Value>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guest {
    pub id: i64,
    pub hotel_id: i64,
    pub phone_number: String,
    pub name: Option<String>,
    pub check_in_date: Option<DateTime<Utc>>,
    pub check_out_date: Option<DateTime<Utc>>,
    pub room_number: Option<String>,
    pub preferences: Value,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGuest {
    pub phone_number: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub check_in_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_out_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default = "empty_object")]
    pub preferences: Value,
}

impl NewGuest {
    pub fn from_phone(phone_number: impl Into<String>, name: Option<String>) -> Self {
        Self {
            phone_number: phone_number.into(),
            name,
            check_in_date: None,
            check_out_date: None,
            room_number: None,
            preferences: empty_object(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuestUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub check_in_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub check_out_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub room_number: Option<String>,
    #[serde(default)]
    pub preferences: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub hotel_id: i64,
    pub guest_id: i64,
    pub message_id: Option<String>,
    pub direction: MessageDirection,
    pub content: String,
    pub sentiment_score: Option<f64>,
    pub sentiment_label: Option<SentimentLabel>,
    pub requires_attention: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewConversation {
    pub guest_id: i64,
    pub message_id: Option<String>,
    pub direction: MessageDirection,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    TimeBased,
    ConditionBased,
    SentimentBased,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: i64,
    pub hotel_id: i64,
    pub name: String,
    pub trigger_type: TriggerType,
    pub conditions: Value,
    pub message_template: String,
    pub is_active: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTrigger {
    pub name: String,
    pub trigger_type: TriggerType,
    #[serde(default = "empty_object")]
    pub conditions: Value,
    pub message_template: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub conditions: Option<Value>,
    #[serde(default)]
    pub message_template: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Acknowledged,
}

impl NotificationStatus {
    /// Acknowledged is terminal and nothing moves back to pending.
    pub fn can_transition_to(self, next: NotificationStatus) -> bool {
        matches!(
            (self, next),
            (NotificationStatus::Pending, NotificationStatus::Sent)
                | (NotificationStatus::Pending, NotificationStatus::Acknowledged)
                | (NotificationStatus::Sent, NotificationStatus::Acknowledged)
        )
    }
}

pub const NOTIFICATION_NEGATIVE_SENTIMENT: &str = "negative_sentiment";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffNotification {
    pub id: i64,
    pub hotel_id: i64,
    pub guest_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub notification_type: String,
    pub message: String,
    pub status: NotificationStatus,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewStaffNotification {
    pub guest_id: Option<i64>,
    pub conversation_id: Option<i64>,
    pub notification_type: String,
    pub message: String,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

text_enum!(MessageDirection {
    Inbound => "inbound",
    Outbound => "outbound",
});

text_enum!(SentimentLabel {
    Positive => "positive",
    Neutral => "neutral",
    Negative => "negative",
});

text_enum!(TriggerType {
    TimeBased => "time_based",
    ConditionBased => "condition_based",
    SentimentBased => "sentiment_based",
});

text_enum!(NotificationStatus {
    Pending => "pending",
    Sent => "sent",
    Acknowledged => "acknowledged",
});
