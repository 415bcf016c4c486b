//! Liveness/readiness probes and the Prometheus scrape endpoint.
//!
//! These are served by a small axum router on a separate plain-HTTP
//! listener so orchestrators can probe the process without speaking gRPC:
//!
//! - `GET /health/live` - the process is up.
//! - `GET /health/ready` - storage and the service layer are usable. Returns
//!   `503` when any check is unhealthy.
//! - `GET /metrics` - Prometheus text exposition.
//!
//! The gRPC `grpc.health.v1.Health` service is registered separately in
//! `main`.

use crate::server::metrics::Metrics;
use crate::server::storage::ItemRepository;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::future::join_all;
use itemstore_core::validation::parse_id;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub name: &'static str,
    pub status: HealthStatus,
    pub description: String,
    pub duration_ms: u64,
}

/// Overall status (the worst individual status) plus every report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub checks: Vec<HealthReport>,
}

#[tonic::async_trait]
pub trait HealthCheck: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn check(&self) -> (HealthStatus, String);
}

/// Always healthy while the process can answer.
pub struct SelfCheck;

#[tonic::async_trait]
impl HealthCheck for SelfCheck {
    fn name(&self) -> &'static str {
        "self"
    }

    async fn check(&self) -> (HealthStatus, String) {
        (HealthStatus::Healthy, "Service is running".to_owned())
    }
}

/// Round-trips a count query through the repository.
pub struct StorageCheck {
    repository: Arc<dyn ItemRepository>,
}

impl StorageCheck {
    pub fn new(repository: Arc<dyn ItemRepository>) -> Self {
        Self { repository }
    }
}

#[tonic::async_trait]
impl HealthCheck for StorageCheck {
    fn name(&self) -> &'static str {
        "storage"
    }

    async fn check(&self) -> (HealthStatus, String) {
        match self.repository.count().await {
            Ok(count) => (
                HealthStatus::Healthy,
                format!("Storage is reachable ({count} items)"),
            ),
            Err(err) => {
                tracing::warn!(error = %err, "Storage health check failed");
                (
                    HealthStatus::Unhealthy,
                    "Storage is unreachable".to_owned(),
                )
            }
        }
    }
}

/// Self-test of the validation layer on a freshly generated id.
pub struct ServiceCheck;

#[tonic::async_trait]
impl HealthCheck for ServiceCheck {
    fn name(&self) -> &'static str {
        "service"
    }

    async fn check(&self) -> (HealthStatus, String) {
        let id = Uuid::new_v4();
        match parse_id(&id.to_string()) {
            Ok(parsed) if parsed == id => {
                (HealthStatus::Healthy, "Service layer is operational".to_owned())
            }
            _ => (
                HealthStatus::Degraded,
                "Service layer validation is inconsistent".to_owned(),
            ),
        }
    }
}

/// Runs every check concurrently and reports the worst status.
pub async fn run_checks(checks: &[Arc<dyn HealthCheck>]) -> HealthSummary {
    let reports = join_all(checks.iter().map(|check| async move {
        let started = Instant::now();
        let (status, description) = check.check().await;
        HealthReport {
            name: check.name(),
            status,
            description,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }))
    .await;

    HealthSummary {
        status: reports
            .iter()
            .map(|report| report.status)
            .max()
            .unwrap_or(HealthStatus::Healthy),
        checks: reports,
    }
}

pub struct HealthState {
    liveness: Vec<Arc<dyn HealthCheck>>,
    readiness: Vec<Arc<dyn HealthCheck>>,
    metrics: Arc<Metrics>,
}

impl HealthState {
    /// The standard probe set: `self` for liveness, `storage` and `service`
    /// for readiness.
    pub fn new(repository: Arc<dyn ItemRepository>, metrics: Arc<Metrics>) -> Self {
        Self::with_checks(
            vec![Arc::new(SelfCheck)],
            vec![Arc::new(StorageCheck::new(repository)), Arc::new(ServiceCheck)],
            metrics,
        )
    }

    pub fn with_checks(
        liveness: Vec<Arc<dyn HealthCheck>>,
        readiness: Vec<Arc<dyn HealthCheck>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            liveness,
            readiness,
            metrics,
        }
    }
}

pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn live(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    respond(run_checks(&state.liveness).await)
}

async fn ready(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    respond(run_checks(&state.readiness).await)
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

fn respond(summary: HealthSummary) -> (StatusCode, Json<HealthSummary>) {
    let code = match summary.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (code, Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::storage::MemoryRepository;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fixed(&'static str, HealthStatus);

    #[tonic::async_trait]
    impl HealthCheck for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn check(&self) -> (HealthStatus, String) {
            (self.1, String::new())
        }
    }

    fn metrics() -> Arc<Metrics> {
        Arc::new(Metrics::new().unwrap())
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn ready_with_memory_storage() {
        let state = HealthState::new(Arc::new(MemoryRepository::new()), metrics());
        let (status, body) = get_json(router(Arc::new(state)), "/health/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        let names: Vec<_> = body["checks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|check| check["name"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["storage", "service"]);
    }

    #[tokio::test]
    async fn unhealthy_check_fails_readiness() {
        let state = HealthState::with_checks(
            vec![Arc::new(SelfCheck)],
            vec![
                Arc::new(Fixed("degraded", HealthStatus::Degraded)),
                Arc::new(Fixed("down", HealthStatus::Unhealthy)),
            ],
            metrics(),
        );
        let app = router(Arc::new(state));

        let (status, body) = get_json(app.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unhealthy");

        let (status, body) = get_json(app, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"][0]["name"], "self");
    }

    #[tokio::test]
    async fn degraded_is_still_ready() {
        let state = HealthState::with_checks(
            vec![],
            vec![Arc::new(Fixed("slow", HealthStatus::Degraded))],
            metrics(),
        );
        let (status, body) = get_json(router(Arc::new(state)), "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
    }

    #[tokio::test]
    async fn metrics_are_scrapeable() {
        let metrics = metrics();
        metrics.record_validation_error("CreateItem");
        let state = HealthState::with_checks(vec![], vec![], metrics);

        let response = router(Arc::new(state))
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(r#"itemstore_validation_errors_total{method="CreateItem"} 1"#));
    }
}
