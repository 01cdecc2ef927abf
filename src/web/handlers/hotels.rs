use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::info;

use crate::db::{Hotel, HotelUpdate, NewHotel};
use crate::web::app_state;
use crate::web::error::{ApiError, json_body, page, path_id};

fn validate_settings(settings: &Value) -> Result<(), ApiError> {
    if settings.is_object() {
        Ok(())
    } else {
        Err(ApiError::Unprocessable("settings must be a JSON object".to_string()))
    }
}

fn require_text(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::Unprocessable(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[handler]
pub async fn create_hotel(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<Json<Hotel>, ApiError> {
    let new_hotel: NewHotel = json_body(req).await?;
    require_text("name", &new_hotel.name)?;
    require_text("whatsapp_number", &new_hotel.whatsapp_number)?;
    validate_settings(&new_hotel.settings)?;

    let hotel = app_state(depot)?
        .db
        .hotel_store()
        .create_hotel(&new_hotel)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::Conflict(format!(
                "a hotel with WhatsApp number {} or Green API instance {} already exists",
                new_hotel.whatsapp_number,
                new_hotel.green_api_instance_id.as_deref().unwrap_or("-")
            )),
            other => other,
        })?;
    info!(hotel_id = hotel.id, "Hotel created");
    res.status_code(StatusCode::CREATED);
    Ok(Json(hotel))
}

#[handler]
pub async fn list_hotels(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let (limit, offset) = page(req);
    let active_only = req.query::<bool>("active_only").unwrap_or(false);
    let hotels = app_state(depot)?
        .db
        .hotel_store()
        .list_hotels(active_only, limit, offset)
        .await?;
    Ok(Json(json!({
        "hotels": hotels,
        "count": hotels.len(),
        "limit": limit,
        "offset": offset,
    })))
}

#[handler]
pub async fn get_hotel(req: &mut Request, depot: &mut Depot) -> Result<Json<Hotel>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    app_state(depot)?
        .db
        .hotel_store()
        .get_hotel(hotel_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("hotel"))
}

#[handler]
pub async fn update_hotel(req: &mut Request, depot: &mut Depot) -> Result<Json<Hotel>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let update: HotelUpdate = json_body(req).await?;
    if let Some(name) = &update.name {
        require_text("name", name)?;
    }
    if let Some(number) = &update.whatsapp_number {
        require_text("whatsapp_number", number)?;
    }
    if let Some(settings) = &update.settings {
        validate_settings(settings)?;
    }

    app_state(depot)?
        .db
        .hotel_store()
        .update_hotel(hotel_id, &update)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("hotel"))
}

/// Hotels are never hard-deleted; their history stays queryable.
#[handler]
pub async fn deactivate_hotel(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    if !app_state(depot)?
        .db
        .hotel_store()
        .deactivate_hotel(hotel_id)
        .await?
    {
        return Err(ApiError::NotFound("hotel"));
    }
    info!(hotel_id, "Hotel deactivated");
    Ok(Json(json!({ "id": hotel_id, "is_active": false })))
}
