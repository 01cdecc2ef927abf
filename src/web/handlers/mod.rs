pub mod conversations;
pub mod dead_letters;
pub mod guests;
pub mod health;
pub mod hotels;
pub mod notifications;
pub mod triggers;
pub mod webhooks;

use crate::db::Hotel;
use crate::web::AppState;
use crate::web::error::ApiError;

/// The hotel every tenant-scoped route hangs off; 404 when it does not exist.
pub(crate) async fn require_hotel(state: &AppState, hotel_id: i64) -> Result<Hotel, ApiError> {
    state
        .db
        .hotel_store()
        .get_hotel(hotel_id)
        .await?
        .ok_or(ApiError::NotFound("hotel"))
}
