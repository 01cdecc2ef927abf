use salvo::prelude::*;
use salvo::writing::Scribe;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;

use crate::bot::dispatcher::DispatchError;
use crate::bot::triggers::ConditionError;
use crate::db::DatabaseError;
use crate::green_api::WebhookError;
use crate::resilience::DeadLetterError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl Scribe for ApiError {
    fn render(self, res: &mut Response) {
        if let ApiError::Internal(message) = &self {
            error!(error = %message, "Request failed");
        }
        res.status_code(self.status());
        res.render(Json(json!({ "error": self.to_string() })));
    }
}

impl From<DatabaseError> for ApiError {
    fn from(value: DatabaseError) -> Self {
        match value {
            DatabaseError::Conflict(message) => ApiError::Conflict(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<ConditionError> for ApiError {
    fn from(value: ConditionError) -> Self {
        ApiError::Unprocessable(value.to_string())
    }
}

impl From<WebhookError> for ApiError {
    fn from(value: WebhookError) -> Self {
        ApiError::BadRequest(value.to_string())
    }
}

impl From<DeadLetterError> for ApiError {
    fn from(value: DeadLetterError) -> Self {
        ApiError::Unavailable(format!("dead letter queue: {value}"))
    }
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        match value {
            DispatchError::DeadLetter(err) => err.into(),
            other => ApiError::Unavailable(other.to_string()),
        }
    }
}

/// Reads the body as JSON. Unparseable bodies are 400, bodies of the wrong
/// shape are 422.
pub async fn json_body<T: DeserializeOwned>(req: &mut Request) -> Result<T, ApiError> {
    let value: Value = req
        .parse_json()
        .await
        .map_err(|e| ApiError::BadRequest(format!("malformed JSON body: {e}")))?;
    serde_json::from_value(value).map_err(|e| ApiError::Unprocessable(e.to_string()))
}

pub fn path_id(req: &Request, name: &'static str) -> Result<i64, ApiError> {
    req.param::<i64>(name)
        .filter(|id| *id > 0)
        .ok_or(ApiError::NotFound(name))
}

pub fn page(req: &Request) -> (i64, i64) {
    let limit = req.query::<i64>("limit").unwrap_or(100).clamp(1, 1000);
    let offset = req.query::<i64>("offset").unwrap_or(0).max(0);
    (limit, offset)
}
