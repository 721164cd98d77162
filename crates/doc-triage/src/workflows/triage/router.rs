use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{CaseId, Evidence};
use super::service::{TriageRequest, TriageService, TriageServiceError};

const DEFAULT_STATS_WINDOW_MINUTES: i64 = 60;

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    #[serde(default)]
    pub evidence: Evidence,
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub service: Option<String>,
    pub window_minutes: Option<i64>,
}

/// Router builder exposing triage submission, lookup and diagnostics.
pub fn triage_router(service: Arc<TriageService>) -> Router {
    Router::new()
        .route("/api/v1/triage", post(submit_handler))
        .route("/api/v1/classify", post(classify_handler))
        .route("/api/v1/cases/:case_id/triage", get(result_handler))
        .route("/api/v1/cases/:case_id/documents", get(documents_handler))
        .route("/api/v1/resilience/stats", get(stats_handler))
        .with_state(service)
}

pub(crate) async fn submit_handler(
    State(service): State<Arc<TriageService>>,
    axum::Json(request): axum::Json<TriageRequest>,
) -> Response {
    match service.accept(request) {
        Ok(case_id) => {
            let payload = json!({ "case_id": case_id, "status": "accepted" });
            (StatusCode::ACCEPTED, axum::Json(payload)).into_response()
        }
        Err(error @ TriageServiceError::InFlight(_)) => {
            let payload = json!({ "error": error.to_string() });
            (StatusCode::CONFLICT, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn result_handler(
    State(service): State<Arc<TriageService>>,
    Path(case_id): Path<String>,
) -> Response {
    let case_id = CaseId(case_id);
    match service.latest(&case_id) {
        Some(result) => (StatusCode::OK, axum::Json(result)).into_response(),
        None => {
            let payload = json!({
                "case_id": case_id,
                "error": "no triage result recorded for case",
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn documents_handler(
    State(service): State<Arc<TriageService>>,
    Path(case_id): Path<String>,
) -> Response {
    let case_id = CaseId(case_id);
    match service.documents(&case_id).await {
        Ok(documents) => {
            let payload = json!({ "case_id": case_id, "documents": documents });
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Err(TriageServiceError::Resilience(error)) => {
            let payload = json!({
                "error": error.to_string(),
                "service": error.service(),
            });
            (StatusCode::SERVICE_UNAVAILABLE, axum::Json(payload)).into_response()
        }
        Err(other) => {
            let payload = json!({ "error": other.to_string() });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn classify_handler(
    State(service): State<Arc<TriageService>>,
    axum::Json(request): axum::Json<ClassifyRequest>,
) -> Response {
    let view = service.classify(&request.evidence, request.today);
    (StatusCode::OK, axum::Json(view)).into_response()
}

pub(crate) async fn stats_handler(
    State(service): State<Arc<TriageService>>,
    Query(query): Query<StatsQuery>,
) -> Response {
    let window = query.window_minutes.unwrap_or(DEFAULT_STATS_WINDOW_MINUTES);
    let report = service.resilience_report(query.service.as_deref(), window);
    (StatusCode::OK, axum::Json(report)).into_response()
}
