use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::info;

use super::require_hotel;
use crate::bot::triggers::parse_rule;
use crate::db::{NewTrigger, Trigger, TriggerUpdate};
use crate::web::app_state;
use crate::web::error::{ApiError, json_body, path_id};

fn require_text(field: &'static str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        Err(ApiError::Unprocessable(format!("{field} must not be empty")))
    } else {
        Ok(())
    }
}

#[handler]
pub async fn create_trigger(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<Json<Trigger>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let new_trigger: NewTrigger = json_body(req).await?;
    require_text("name", &new_trigger.name)?;
    require_text("message_template", &new_trigger.message_template)?;
    parse_rule(new_trigger.trigger_type, &new_trigger.conditions)?;

    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;
    let trigger = state
        .db
        .trigger_store()
        .create_trigger(hotel_id, &new_trigger)
        .await?;
    info!(hotel_id, trigger_id = trigger.id, trigger_type = %trigger.trigger_type, "Trigger created");
    res.status_code(StatusCode::CREATED);
    Ok(Json(trigger))
}

#[handler]
pub async fn list_triggers(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let active_only = req.query::<bool>("active_only").unwrap_or(false);
    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;
    let triggers = state
        .db
        .trigger_store()
        .list_triggers(hotel_id, active_only)
        .await?;
    Ok(Json(json!({
        "triggers": triggers,
        "count": triggers.len(),
    })))
}

#[handler]
pub async fn get_trigger(req: &mut Request, depot: &mut Depot) -> Result<Json<Trigger>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let trigger_id = path_id(req, "trigger_id")?;
    app_state(depot)?
        .db
        .trigger_store()
        .get_trigger(hotel_id, trigger_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("trigger"))
}

/// The trigger type is fixed at creation; new conditions are validated
/// against it.
#[handler]
pub async fn update_trigger(req: &mut Request, depot: &mut Depot) -> Result<Json<Trigger>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let trigger_id = path_id(req, "trigger_id")?;
    let update: TriggerUpdate = json_body(req).await?;
    if let Some(name) = &update.name {
        require_text("name", name)?;
    }
    if let Some(template) = &update.message_template {
        require_text("message_template", template)?;
    }

    let store = app_state(depot)?.db.trigger_store();
    let current = store
        .get_trigger(hotel_id, trigger_id)
        .await?
        .ok_or(ApiError::NotFound("trigger"))?;
    if let Some(conditions) = &update.conditions {
        parse_rule(current.trigger_type, conditions)?;
    }

    store
        .update_trigger(hotel_id, trigger_id, &update)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("trigger"))
}

#[handler]
pub async fn delete_trigger(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let trigger_id = path_id(req, "trigger_id")?;
    if !app_state(depot)?
        .db
        .trigger_store()
        .delete_trigger(hotel_id, trigger_id)
        .await?
    {
        return Err(ApiError::NotFound("trigger"));
    }
    info!(hotel_id, trigger_id, "Trigger deleted");
    Ok(Json(json!({ "id": trigger_id, "deleted": true })))
}
