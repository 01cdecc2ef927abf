use salvo::prelude::*;
use serde_json::{Value, json};
use tracing::debug;

use crate::bot::pipeline::InboundOutcome;
use crate::green_api::{WebhookEvent, parse_webhook};
use crate::web::app_state;
use crate::web::error::ApiError;
use crate::web::metrics::Metrics;

/// Green API notification endpoint. Anything that is not a guest text message
/// is acknowledged with 200 so the gateway does not redeliver it.
#[handler]
pub async fn green_api(req: &mut Request, depot: &mut Depot) -> Result<Json<Value>, ApiError> {
    let body: Value = req
        .parse_json()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {e}")))?;
    Metrics::webhook_received();

    let message = match parse_webhook(body)? {
        WebhookEvent::IncomingText(message) => message,
        WebhookEvent::Ignored {
            type_webhook,
            reason,
        } => {
            debug!(%type_webhook, reason, "Ignoring webhook");
            Metrics::webhook_ignored();
            return Ok(Json(json!({ "status": "ignored", "reason": reason })));
        }
    };

    let outcome = app_state(depot)?.bot.pipeline().handle(&message).await?;
    Ok(Json(match outcome {
        InboundOutcome::Processed(processed) => json!({
            "status": "processed",
            "message": processed,
        }),
        InboundOutcome::Duplicate => json!({ "status": "duplicate" }),
        InboundOutcome::UnknownInstance => json!({ "status": "unknown_instance" }),
        InboundOutcome::HotelInactive => json!({ "status": "hotel_inactive" }),
    }))
}

#[cfg(test)]
mod tests {
    use salvo::test::{ResponseExt, TestClient};

    use super::*;
    use crate::db::testing::seed_hotel;
    use crate::web::handlers::testing::{BASE, app, app_with_webhook_token};

    fn incoming(message_id: &str, text: &str) -> Value {
        json!({
            "typeWebhook": "incomingMessageReceived",
            "instanceData": { "idInstance": 1101, "wid": "15550001@c.us" },
            "timestamp": 1_700_000_000,
            "idMessage": message_id,
            "senderData": {
                "chatId": "79001112233@c.us",
                "sender": "79001112233@c.us",
                "senderName": "Anna"
            },
            "messageData": {
                "typeMessage": "textMessage",
                "textMessageData": { "textMessage": text }
            }
        })
    }

    fn url() -> String {
        format!("{BASE}/api/v1/webhooks/green-api")
    }

    #[tokio::test]
    async fn missing_fields_are_bad_request() {
        let app = app().await;
        let mut payload = incoming("A1", "Hello");
        payload
            .as_object_mut()
            .expect("object")
            .remove("idMessage");
        let res = TestClient::post(url()).json(&payload).send(&app.service).await;
        assert_eq!(res.status_code, Some(StatusCode::BAD_REQUEST));

        let malformed = TestClient::post(url())
            .raw_json("{ \"typeWebhook\": ")
            .send(&app.service)
            .await;
        assert_eq!(malformed.status_code, Some(StatusCode::BAD_REQUEST));
    }

    #[tokio::test]
    async fn status_callbacks_are_ignored() {
        let app = app().await;
        let mut res = TestClient::post(url())
            .json(&json!({
                "typeWebhook": "outgoingMessageStatus",
                "instanceData": { "idInstance": 1101 },
                "idMessage": "A1",
                "status": "delivered"
            }))
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let body: Value = res.take_json().await.expect("json");
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn message_is_processed_once() {
        let app = app().await;
        let hotel = seed_hotel(&app.db, "+100", "1101").await;

        let mut first = TestClient::post(url())
            .json(&incoming("A1", "Thank you, the room is wonderful"))
            .send(&app.service)
            .await;
        assert_eq!(first.status_code, Some(StatusCode::OK));
        let body: Value = first.take_json().await.expect("json");
        assert_eq!(body["status"], "processed");
        assert_eq!(body["message"]["hotel_id"], hotel.id);
        assert_eq!(body["message"]["sentiment"]["source"], "fallback");

        let mut second = TestClient::post(url())
            .json(&incoming("A1", "Thank you, the room is wonderful"))
            .send(&app.service)
            .await;
        let body: Value = second.take_json().await.expect("json");
        assert_eq!(body["status"], "duplicate");
    }

    #[tokio::test]
    async fn unknown_instance_is_acknowledged() {
        let app = app().await;
        let mut res = TestClient::post(url())
            .json(&incoming("A1", "Hello"))
            .send(&app.service)
            .await;
        assert_eq!(res.status_code, Some(StatusCode::OK));
        let body: Value = res.take_json().await.expect("json");
        assert_eq!(body["status"], "unknown_instance");
    }

    #[tokio::test]
    async fn webhook_token_is_enforced_when_configured() {
        let app = app_with_webhook_token(Some("hook-token")).await;
        seed_hotel(&app.db, "+100", "1101").await;

        let anonymous = TestClient::post(url())
            .json(&incoming("A1", "Hello"))
            .send(&app.service)
            .await;
        assert_eq!(anonymous.status_code, Some(StatusCode::UNAUTHORIZED));

        let authorized = TestClient::post(url())
            .bearer_auth("hook-token")
            .json(&incoming("A1", "Hello"))
            .send(&app.service)
            .await;
        assert_eq!(authorized.status_code, Some(StatusCode::OK));
    }
}
