use salvo::prelude::*;
use serde_json::{Value, json};

use super::require_hotel;
use crate::web::app_state;
use crate::web::error::{ApiError, path_id};

fn limit(req: &Request) -> i64 {
    req.query::<i64>("limit").unwrap_or(50).clamp(1, 500)
}

/// Newest first.
#[handler]
pub async fn list_for_guest(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let guest_id = path_id(req, "guest_id")?;
    let limit = limit(req);
    let db = &app_state(depot)?.db;

    if db.guest_store().get_guest(hotel_id, guest_id).await?.is_none() {
        return Err(ApiError::NotFound("guest"));
    }
    let conversations = db
        .conversation_store()
        .list_for_guest(hotel_id, guest_id, limit)
        .await?;
    Ok(Json(json!({
        "conversations": conversations,
        "count": conversations.len(),
    })))
}

/// Hotel-wide listing is limited to the staff attention queue; full history
/// is read per guest.
#[handler]
pub async fn list_for_hotel(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    if !req.query::<bool>("requires_attention").unwrap_or(true) {
        return Err(ApiError::Unprocessable(
            "only requires_attention=true is supported here; read history per guest".to_string(),
        ));
    }
    let limit = limit(req);
    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;

    let conversations = state
        .db
        .conversation_store()
        .list_requiring_attention(hotel_id, limit)
        .await?;
    Ok(Json(json!({
        "conversations": conversations,
        "count": conversations.len(),
    })))
}
