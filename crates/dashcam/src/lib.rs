//! Dashcam Appliance
//!
//! Wires the bus channels, position service, video capture and display tick
//! loop together and serves a small operator API for read-outs and the manual
//! fuel reset.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use position::SharedPosition;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use telemetry::{Decoder, SharedTelemetry};
use tower_http::trace::TraceLayer;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

pub mod app;
pub mod pipeline;
mod routes;
pub mod settings;

use pipeline::TickStats;

/// Application state shared across handlers
pub struct AppState {
    /// Live telemetry record
    pub telemetry: Arc<SharedTelemetry>,
    /// Bus decoder, for its counters
    pub decoder: Arc<Decoder>,
    /// Latest position, when the position service runs
    pub position: Option<Arc<SharedPosition>>,
    /// Display tick counters
    pub ticks: Arc<TickStats>,
    /// Prometheus exporter, when installed
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

impl AppState {
    /// Create application state around the running components
    pub fn new(
        telemetry: Arc<SharedTelemetry>,
        decoder: Arc<Decoder>,
        position: Option<Arc<SharedPosition>>,
        ticks: Arc<TickStats>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            telemetry,
            decoder,
            position,
            ticks,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub components: ComponentStatus,
}

/// Component status
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub bus: ComponentHealth,
    pub position: ComponentHealth,
    pub display: ComponentHealth,
}

/// Individual component health
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub last_activity_ms: Option<u64>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/telemetry", get(routes::telemetry::get_telemetry))
        .route("/api/v1/fuel/reset", post(routes::fuel::reset))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn component(status: &str, last_activity_ms: Option<u64>) -> ComponentHealth {
    ComponentHealth {
        status: status.to_string(),
        last_activity_ms,
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Instant::now();

    let bus = match state.telemetry.snapshot() {
        Ok(snapshot) => match snapshot.last_update() {
            Some(at) => component("ok", Some(now.duration_since(at).as_millis() as u64)),
            None => component("waiting", None),
        },
        Err(_) => component("error", None),
    };

    let position = match &state.position {
        None => component("disabled", None),
        Some(shared) => match shared.age(now) {
            Ok(Some(age)) if age <= shared.stale_after() => {
                component("ok", Some(age.as_millis() as u64))
            }
            Ok(Some(age)) => component("stale", Some(age.as_millis() as u64)),
            Ok(None) => component("waiting", None),
            Err(_) => component("error", None),
        },
    };

    let display = if state.ticks.presents.load(Ordering::Relaxed) > 0 {
        component("ok", None)
    } else {
        component("waiting", None)
    };

    let healthy = bus.status != "error" && position.status != "error";
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        components: ComponentStatus {
            bus,
            position,
            display,
        },
    };

    Json(response)
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics exporter not installed".to_string(),
        ),
    }
}

/// Initialize logging
pub fn init_logging(level: Level, json: bool) -> Result<(), SetGlobalDefaultError> {
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}

/// Serve the operator API until `shutdown` resolves
pub async fn run_server(
    addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = create_router(state);

    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use std::time::Duration;
    use telemetry::{FieldGroup, FuelConfig, ScalingConfig, CAMARO_2013_LFX};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let telemetry = Arc::new(SharedTelemetry::new(FuelConfig::default()));
        let decoder = Arc::new(Decoder::new(
            &CAMARO_2013_LFX,
            ScalingConfig::default(),
            telemetry.clone(),
        ));
        Arc::new(AppState::new(
            telemetry,
            decoder,
            None,
            Arc::new(TickStats::default()),
            None,
        ))
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(state());
        let (status, body) = call(app, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"]["bus"]["status"], "waiting");
        assert_eq!(body["components"]["position"]["status"], "disabled");
    }

    #[tokio::test]
    async fn test_fuel_reset_visible_in_telemetry() {
        let state = state();
        let t0 = Instant::now();
        let fuel = FieldGroup::FuelSystem { level_pct: 60.0, flow_lph: 36.0 };
        state.telemetry.apply(fuel, t0).unwrap();
        state.telemetry.apply(fuel, t0 + Duration::from_secs(100)).unwrap();

        let app = create_router(state);
        let (_, body) = call(app.clone(), "GET", "/api/v1/telemetry").await;
        let reported = body["fuel"]["consumed_liters"].as_f64().unwrap();
        assert!((reported - 1.025).abs() < 1e-9);
        assert_eq!(body["fuel"]["valid"], true);

        let (status, body) = call(app.clone(), "POST", "/api/v1/fuel/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert!((body["cleared_liters"].as_f64().unwrap() - 1.025).abs() < 1e-9);

        let (_, body) = call(app, "GET", "/api/v1/telemetry").await;
        assert_eq!(body["fuel"]["consumed_liters"].as_f64(), Some(0.0));
        assert_eq!(body["fuel"]["valid"], true);
    }

    #[tokio::test]
    async fn test_reset_requires_post() {
        let app = create_router(state());
        let (status, _) = call(app, "GET", "/api/v1/fuel/reset").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_metrics_without_exporter() {
        let app = create_router(state());
        let (status, _) = call(app, "GET", "/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
