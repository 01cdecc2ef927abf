use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::info;

use super::require_hotel;
use crate::db::{NotificationStatus, StaffNotification};
use crate::web::app_state;
use crate::web::error::{ApiError, path_id};

#[handler]
pub async fn list_notifications(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let status = req
        .query::<String>("status")
        .map(|status| status.parse::<NotificationStatus>())
        .transpose()
        .map_err(ApiError::Unprocessable)?;
    let limit = req.query::<i64>("limit").unwrap_or(100).clamp(1, 1000);

    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;
    let notifications = state
        .db
        .notification_store()
        .list_notifications(hotel_id, status, limit)
        .await?;
    Ok(Json(json!({
        "notifications": notifications,
        "count": notifications.len(),
    })))
}

/// Acknowledging is a compare-and-set from whatever status was read, so two
/// staff members racing on the same alert get one success and one 409.
#[handler]
pub async fn acknowledge(req: &mut Request, depot: &mut Depot) -> Result<Json<StaffNotification>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let notification_id = path_id(req, "notification_id")?;
    let store = app_state(depot)?.db.notification_store();

    let current = store
        .get_notification(hotel_id, notification_id)
        .await?
        .ok_or(ApiError::NotFound("notification"))?;
    if current.status == NotificationStatus::Acknowledged {
        return Err(ApiError::Conflict(format!(
            "notification {notification_id} is already acknowledged"
        )));
    }

    let acknowledged = store
        .transition_notification(
            hotel_id,
            notification_id,
            current.status,
            NotificationStatus::Acknowledged,
        )
        .await?
        .ok_or_else(|| {
            ApiError::Conflict(format!(
                "notification {notification_id} changed status concurrently"
            ))
        })?;
    info!(hotel_id, notification_id, "Staff notification acknowledged");
    Ok(Json(acknowledged))
}
