pub use self::error::DatabaseError;
pub use self::manager::{DatabaseManager, DbPool};
pub use self::models::{
    Conversation, Guest, GuestUpdate, Hotel, HotelUpdate, MessageDirection, NewConversation,
    NewGuest, NewHotel, NewStaffNotification, NewTrigger, NotificationStatus, SentimentLabel,
    StaffNotification, Trigger, TriggerType, TriggerUpdate, NOTIFICATION_NEGATIVE_SENTIMENT,
};
pub use self::stores::{ConversationStore, GuestStore, HotelStore, NotificationStore, TriggerStore};

pub mod error;
#[macro_use]
pub mod manager;
pub mod models;
pub mod schema;
pub mod stores;

#[cfg(test)]
pub(crate) mod testing;
