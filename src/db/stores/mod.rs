use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use super::DatabaseError;
use super::models::{
    Conversation, Guest, GuestUpdate, Hotel, HotelUpdate, NewConversation, NewGuest, NewHotel,
    NewStaffNotification, NewTrigger, NotificationStatus, SentimentLabel, StaffNotification,
    Trigger, TriggerType, TriggerUpdate,
};

mod conversations;
mod guests;
mod hotels;
mod notifications;
mod triggers;

pub use self::conversations::SqlConversationStore;
pub use self::guests::SqlGuestStore;
pub use self::hotels::SqlHotelStore;
pub use self::notifications::SqlNotificationStore;
pub use self::triggers::SqlTriggerStore;

#[async_trait]
pub trait HotelStore: Send + Sync {
    async fn create_hotel(&self, hotel: &NewHotel) -> Result<Hotel, DatabaseError>;
    async fn get_hotel(&self, id: i64) -> Result<Option<Hotel>, DatabaseError>;
    async fn get_hotel_by_instance(&self, instance_id: &str)
    -> Result<Option<Hotel>, DatabaseError>;
    async fn list_hotels(
        &self,
        active_only: bool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Hotel>, DatabaseError>;
    async fn update_hotel(
        &self,
        id: i64,
        update: &HotelUpdate,
    ) -> Result<Option<Hotel>, DatabaseError>;
    async fn deactivate_hotel(&self, id: i64) -> Result<bool, DatabaseError>;
}

/// Every method is scoped to one hotel; rows of other hotels are invisible.
#[async_trait]
pub trait GuestStore: Send + Sync {
    async fn create_guest(&self, hotel_id: i64, guest: &NewGuest) -> Result<Guest, DatabaseError>;
    async fn get_guest(&self, hotel_id: i64, guest_id: i64)
    -> Result<Option<Guest>, DatabaseError>;
    async fn get_guest_by_phone(
        &self,
        hotel_id: i64,
        phone_number: &str,
    ) -> Result<Option<Guest>, DatabaseError>;
    async fn list_guests(
        &self,
        hotel_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Guest>, DatabaseError>;
    async fn list_guests_with_stay_dates(&self, hotel_id: i64) -> Result<Vec<Guest>, DatabaseError>;
    async fn update_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        update: &GuestUpdate,
    ) -> Result<Option<Guest>, DatabaseError>;
    async fn touch_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Fails with [`DatabaseError::Conflict`] when the message id was already recorded.
    async fn record_message(
        &self,
        hotel_id: i64,
        message: &NewConversation,
    ) -> Result<Conversation, DatabaseError>;
    async fn message_exists(&self, message_id: &str) -> Result<bool, DatabaseError>;
    async fn update_sentiment(
        &self,
        hotel_id: i64,
        conversation_id: i64,
        score: f64,
        label: SentimentLabel,
        requires_attention: bool,
    ) -> Result<Option<Conversation>, DatabaseError>;
    /// Newest first.
    async fn list_for_guest(
        &self,
        hotel_id: i64,
        guest_id: i64,
        limit: i64,
    ) -> Result<Vec<Conversation>, DatabaseError>;
    async fn list_requiring_attention(
        &self,
        hotel_id: i64,
        limit: i64,
    ) -> Result<Vec<Conversation>, DatabaseError>;
}

#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn create_trigger(
        &self,
        hotel_id: i64,
        trigger: &NewTrigger,
    ) -> Result<Trigger, DatabaseError>;
    async fn get_trigger(
        &self,
        hotel_id: i64,
        trigger_id: i64,
    ) -> Result<Option<Trigger>, DatabaseError>;
    async fn list_triggers(
        &self,
        hotel_id: i64,
        active_only: bool,
    ) -> Result<Vec<Trigger>, DatabaseError>;
    /// Highest priority first.
    async fn list_active_by_type(
        &self,
        hotel_id: i64,
        trigger_type: TriggerType,
    ) -> Result<Vec<Trigger>, DatabaseError>;
    async fn update_trigger(
        &self,
        hotel_id: i64,
        trigger_id: i64,
        update: &TriggerUpdate,
    ) -> Result<Option<Trigger>, DatabaseError>;
    async fn delete_trigger(&self, hotel_id: i64, trigger_id: i64) -> Result<bool, DatabaseError>;
    /// Returns `false` when the trigger already fired for this guest.
    async fn record_execution(
        &self,
        hotel_id: i64,
        trigger_id: i64,
        guest_id: i64,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(
        &self,
        hotel_id: i64,
        notification: &NewStaffNotification,
    ) -> Result<StaffNotification, DatabaseError>;
    async fn get_notification(
        &self,
        hotel_id: i64,
        notification_id: i64,
    ) -> Result<Option<StaffNotification>, DatabaseError>;
    async fn list_notifications(
        &self,
        hotel_id: i64,
        status: Option<NotificationStatus>,
        limit: i64,
    ) -> Result<Vec<StaffNotification>, DatabaseError>;
    /// Compare-and-set on the status column; `None` when the row is missing or
    /// no longer in `from`.
    async fn transition_notification(
        &self,
        hotel_id: i64,
        notification_id: i64,
        from: NotificationStatus,
        to: NotificationStatus,
    ) -> Result<Option<StaffNotification>, DatabaseError>;
}

pub(crate) fn to_naive(value: &DateTime<Utc>) -> NaiveDateTime {
    value.naive_utc()
}

pub(crate) fn from_naive(value: NaiveDateTime) -> DateTime<Utc> {
    value.and_utc()
}

pub(crate) fn json_to_text(value: &serde_json::Value) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Query(e.to_string()))
}

pub(crate) fn text_to_json(value: &str) -> Result<serde_json::Value, DatabaseError> {
    serde_json::from_str(value).map_err(|e| DatabaseError::Corrupt(format!("invalid json: {e}")))
}

pub(crate) fn parse_column<T>(value: &str) -> Result<T, DatabaseError>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse().map_err(DatabaseError::Corrupt)
}
