use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use doc_triage::workflows::triage::{triage_router, TriageService};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_triage_routes(service: Arc<TriageService>) -> axum::Router {
    triage_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory_triage_service;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use doc_triage::config::{AppConfig, AppEnvironment, ServerConfig, TelemetryConfig};
    use doc_triage::workflows::triage::{AlertConfig, PipelineSettings, ResiliencePolicy};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;

    fn test_config() -> AppConfig {
        AppConfig {
            environment: AppEnvironment::Test,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
            },
            pipeline: PipelineSettings::default(),
            resilience: ResiliencePolicy::default(),
            alerts: AlertConfig::default(),
        }
    }

    fn build_router(ready: bool) -> axum::Router {
        let (service, _) = memory_triage_service(&test_config());
        let state = AppState {
            readiness: Arc::new(AtomicBool::new(ready)),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        with_triage_routes(service).layer(Extension(state))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn read_json(response: axum::response::Response) -> Value {
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&body).expect("json")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = build_router(true)
            .oneshot(get("/health"))
            .await
            .expect("router dispatch");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let response = build_router(false)
            .oneshot(get("/ready"))
            .await
            .expect("router dispatch");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let state_flag = Arc::new(AtomicBool::new(false));
        let (service, _) = memory_triage_service(&test_config());
        let router = with_triage_routes(service).layer(Extension(AppState {
            readiness: state_flag.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        }));
        state_flag.store(true, Ordering::Release);

        let response = router.oneshot(get("/ready")).await.expect("router dispatch");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json(response).await, json!({ "status": "ready" }));
    }

    #[tokio::test]
    async fn triage_routes_are_mounted() {
        let response = build_router(true)
            .oneshot(get("/api/v1/resilience/stats"))
            .await
            .expect("router dispatch");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = read_json(response).await;
        assert_eq!(payload.pointer("/errors/total_errors"), Some(&json!(0)));
        assert_eq!(payload.pointer("/errors/window_minutes"), Some(&json!(60)));
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_prometheus_text() {
        let response = build_router(true)
            .oneshot(get("/metrics"))
            .await
            .expect("router dispatch");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok()),
            Some("text/plain; version=0.0.4")
        );
    }
}
