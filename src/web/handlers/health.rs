use salvo::prelude::*;
use serde_json::{Value, json};

use crate::resilience::HealthStatus;
use crate::resilience::health::{DetailedReport, ReadinessReport};
use crate::web::app_state;
use crate::web::error::ApiError;

#[handler]
pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// 503 while any mandatory dependency is down.
#[handler]
pub async fn readiness(depot: &mut Depot, res: &mut Response) -> Result<Json<ReadinessReport>, ApiError> {
    let report = app_state(depot)?.health.readiness().await;
    if !report.ready {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(report))
}

#[handler]
pub async fn detailed(depot: &mut Depot, res: &mut Response) -> Result<Json<DetailedReport>, ApiError> {
    let report = app_state(depot)?.health.detailed().await;
    if report.status == HealthStatus::Unhealthy {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(report))
}
