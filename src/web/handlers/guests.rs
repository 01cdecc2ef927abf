use chrono::{DateTime, Utc};
use salvo::prelude::*;
use serde_json::{Value, json};

use super::require_hotel;
use crate::db::{Guest, GuestUpdate, NewGuest};
use crate::web::app_state;
use crate::web::error::{ApiError, json_body, page, path_id};

fn validate_stay(
    check_in: Option<DateTime<Utc>>,
    check_out: Option<DateTime<Utc>>,
) -> Result<(), ApiError> {
    match (check_in, check_out) {
        (Some(check_in), Some(check_out)) if check_out < check_in => Err(ApiError::Unprocessable(
            "check_out_date must not be before check_in_date".to_string(),
        )),
        _ => Ok(()),
    }
}

fn validate_preferences(preferences: &Value) -> Result<(), ApiError> {
    if preferences.is_object() {
        Ok(())
    } else {
        Err(ApiError::Unprocessable(
            "preferences must be a JSON object".to_string(),
        ))
    }
}

#[handler]
pub async fn create_guest(
    req: &mut Request,
    depot: &mut Depot,
    res: &mut Response,
) -> Result<Json<Guest>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let new_guest: NewGuest = json_body(req).await?;
    if !new_guest.phone_number.chars().any(|c| c.is_ascii_digit()) {
        return Err(ApiError::Unprocessable(
            "phone_number must contain digits".to_string(),
        ));
    }
    validate_stay(new_guest.check_in_date, new_guest.check_out_date)?;
    validate_preferences(&new_guest.preferences)?;

    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;
    let guest = state
        .db
        .guest_store()
        .create_guest(hotel_id, &new_guest)
        .await
        .map_err(|err| match ApiError::from(err) {
            ApiError::Conflict(_) => ApiError::Conflict(format!(
                "guest with phone number {} already exists",
                new_guest.phone_number
            )),
            other => other,
        })?;
    res.status_code(StatusCode::CREATED);
    Ok(Json(guest))
}

#[handler]
pub async fn list_guests(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let (limit, offset) = page(req);
    let state = app_state(depot)?;
    require_hotel(state, hotel_id).await?;
    let guests = state
        .db
        .guest_store()
        .list_guests(hotel_id, limit, offset)
        .await?;
    Ok(Json(json!({
        "guests": guests,
        "count": guests.len(),
        "limit": limit,
        "offset": offset,
    })))
}

#[handler]
pub async fn get_guest(req: &mut Request, depot: &mut Depot) -> Result<Json<Guest>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let guest_id = path_id(req, "guest_id")?;
    app_state(depot)?
        .db
        .guest_store()
        .get_guest(hotel_id, guest_id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("guest"))
}

#[handler]
pub async fn update_guest(req: &mut Request, depot: &mut Depot) -> Result<Json<Guest>, ApiError> {
    let hotel_id = path_id(req, "hotel_id")?;
    let guest_id = path_id(req, "guest_id")?;
    let update: GuestUpdate = json_body(req).await?;
    if let Some(preferences) = &update.preferences {
        validate_preferences(preferences)?;
    }

    let store = app_state(depot)?.db.guest_store();
    let current = store
        .get_guest(hotel_id, guest_id)
        .await?
        .ok_or(ApiError::NotFound("guest"))?;
    validate_stay(
        update.check_in_date.or(current.check_in_date),
        update.check_out_date.or(current.check_out_date),
    )?;

    store
        .update_guest(hotel_id, guest_id, &update)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("guest"))
}

#[cfg(test)]
mod tests {
    use salvo::test::{ResponseExt, TestClient};

    use super::*;
    use crate::db::testing::{seed_guest, seed_hotel};
    use crate::web::handlers::testing::{BASE, SECRET, app};

    #[tokio::test]
    async fn guest_of_other_hotel_is_not_found() {
        let app = app().await;
        let hotel_a = seed_hotel(&app.db, "+100", "1101").await;
        let hotel_b = seed_hotel(&app.db, "+200", "2202").await;
        let guest = seed_guest(&app.db, hotel_a.id, "79001112233").await;

        let mut own = TestClient::get(format!(
            "{BASE}/api/v1/hotels/{}/guests/{}",
            hotel_a.id, guest.id
        ))
        .bearer_auth(SECRET)
        .send(&app.service)
        .await;
        assert_eq!(own.status_code, Some(StatusCode::OK));
        let body: Value = own.take_json().await.expect("json");
        assert_eq!(body["phone_number"], "79001112233");

        let foreign = TestClient::get(format!(
            "{BASE}/api/v1/hotels/{}/guests/{}",
            hotel_b.id, guest.id
        ))
        .bearer_auth(SECRET)
        .send(&app.service)
        .await;
        assert_eq!(foreign.status_code, Some(StatusCode::NOT_FOUND));

        let foreign_update = TestClient::put(format!(
            "{BASE}/api/v1/hotels/{}/guests/{}",
            hotel_b.id, guest.id
        ))
        .bearer_auth(SECRET)
        .json(&json!({ "name": "Mallory" }))
        .send(&app.service)
        .await;
        assert_eq!(foreign_update.status_code, Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn duplicate_phone_is_conflict_within_hotel_only() {
        let app = app().await;
        let hotel_a = seed_hotel(&app.db, "+100", "1101").await;
        let hotel_b = seed_hotel(&app.db, "+200", "2202").await;
        let body = json!({ "phone_number": "79001112233", "name": "Anna" });

        for (hotel_id, expected) in [
            (hotel_a.id, StatusCode::CREATED),
            (hotel_a.id, StatusCode::CONFLICT),
            (hotel_b.id, StatusCode::CREATED),
        ] {
            let res = TestClient::post(format!("{BASE}/api/v1/hotels/{hotel_id}/guests"))
                .bearer_auth(SECRET)
                .json(&body)
                .send(&app.service)
                .await;
            assert_eq!(res.status_code, Some(expected));
        }
    }

    #[tokio::test]
    async fn stay_dates_are_validated() {
        let app = app().await;
        let hotel = seed_hotel(&app.db, "+100", "1101").await;
        let res = TestClient::post(format!("{BASE}/api/v1/hotels/{}/guests", hotel.id))
            .bearer_auth(SECRET)
            .json(&json!({
                "phone_number": "79001112233",
                "check_in_date": "2024-06-05T14:00:00Z",
                "check_out_date": "2024-06-01T12:00:00Z"
            }))
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::UNPROCESSABLE_ENTITY));
    }

    #[tokio::test]
    async fn guests_of_missing_hotel_are_not_found() {
        let app = app().await;
        let res = TestClient::get(format!("{BASE}/api/v1/hotels/42/guests"))
            .bearer_auth(SECRET)
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::NOT_FOUND));
    }
}
