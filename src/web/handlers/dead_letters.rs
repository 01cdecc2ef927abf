use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::bot::dispatcher::OutboundJob;
use crate::resilience::DeadLetter;
use crate::web::app_state;
use crate::web::error::{ApiError, page};

fn letter_id(req: &Request) -> Result<Uuid, ApiError> {
    req.param::<String>("id")
        .and_then(|id| Uuid::parse_str(&id).ok())
        .ok_or(ApiError::NotFound("dead letter"))
}

/// Newest first.
#[handler]
pub async fn list_dead_letters(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let (limit, offset) = page(req);
    let queue = app_state(depot)?.bot.dispatcher().dead_letters();
    let letters = queue.list(offset as usize, limit as usize).await?;
    let total = queue.len().await?;
    Ok(Json(json!({
        "dead_letters": letters,
        "count": letters.len(),
        "total": total,
    })))
}

#[handler]
pub async fn get_dead_letter(req: &mut Request, depot: &mut Depot) -> Result<Json<DeadLetter>, ApiError> {
    let id = letter_id(req)?;
    app_state(depot)?
        .bot
        .dispatcher()
        .dead_letters()
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("dead letter"))
}

#[handler]
pub async fn delete_dead_letter(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let id = letter_id(req)?;
    app_state(depot)?
        .bot
        .dispatcher()
        .dead_letters()
        .remove(id)
        .await?
        .ok_or(ApiError::NotFound("dead letter"))?;
    info!(%id, "Dead letter discarded");
    Ok(Json(json!({ "id": id, "deleted": true })))
}

/// Removes the letter and puts its job back on the dispatch queue.
#[handler]
pub async fn replay(req: &mut Request, depot: &mut Depot) -> Result<Json<OutboundJob>, ApiError> {
    let id = letter_id(req)?;
    let job = app_state(depot)?
        .bot
        .dispatcher()
        .replay(id)
        .await?
        .ok_or(ApiError::NotFound("dead letter"))?;
    Ok(Json(job))
}
