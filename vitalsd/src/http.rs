//! Loopback HTTP API
//!
//! Read-only surface over the ring buffer (current) and the store (history,
//! processes, summaries, anomalies). All responses are JSON; errors use a
//! uniform envelope. /health always answers 200, even with half the agent
//! down.

use crate::config::Config;
use crate::health::Health;
use crate::models::{MetricKind, ProcessInfo};
use crate::ring::RingBuffer;
use crate::store::Store;
use axum::extract::{Query, State};
use axum::http::header::{HeaderValue, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::middleware::map_response;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub ring: Arc<RingBuffer>,
    pub store: Arc<Store>,
    pub health: Arc<Health>,
    pub config: Arc<Config>,
}

pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn store(e: crate::store::StoreError) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            e.to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/metrics/current", get(current))
        .route("/api/metrics/history", get(history))
        .route("/api/metrics/processes", get(processes))
        .route("/api/metrics/summary", get(summary))
        .route("/api/patterns/anomalies", get(anomalies))
        .route("/health", get(health))
        .route("/api/status/training", get(training))
        .layer(map_response(json_charset))
        .with_state(state)
}

/// Clients are promised an explicit charset on every JSON response.
async fn json_charset(mut response: Response) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json {
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
    }
    response
}

/// Serve until the shutdown signal flips. The bind itself happens in main so
/// a bind failure can map to its exit code before anything else starts.
pub async fn serve(
    state: AppState,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("http listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
}

/// Every handler body runs under the configured per-request deadline.
async fn with_deadline<T, F>(state: &AppState, fut: F) -> Result<T, ApiError>
where
    F: Future<Output = Result<T, ApiError>>,
{
    let budget = std::time::Duration::from_secs(state.config.http.request_timeout_sec);
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::new(
            StatusCode::GATEWAY_TIMEOUT,
            "timeout",
            "request deadline exceeded",
        )),
    }
}

async fn current(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.ring.latest() {
        Some(snapshot) => Ok(Json(&*snapshot).into_response()),
        None => Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no_data",
            "no snapshot collected yet",
        )),
    }
}

#[derive(Deserialize)]
struct HistoryParams {
    metric: String,
    hours: Option<i64>,
    max_points: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<crate::store::HistoryPoint>>, ApiError> {
    let metric = MetricKind::parse(&params.metric).ok_or_else(|| {
        ApiError::bad_request("invalid_metric", format!("unknown metric: {}", params.metric))
    })?;
    let hours = params.hours.unwrap_or(1);
    if !(1..=168).contains(&hours) {
        return Err(ApiError::bad_request("invalid_hours", "hours must be in 1..=168"));
    }
    let max_points = params.max_points.unwrap_or(1000);
    if !(1..=10_000).contains(&max_points) {
        return Err(ApiError::bad_request(
            "invalid_max_points",
            "max_points must be in 1..=10000",
        ));
    }

    let now = Utc::now();
    let points = with_deadline(&state, async {
        state
            .store
            .history(metric, now - Duration::hours(hours), now, max_points)
            .await
            .map_err(ApiError::store)
    })
    .await?;
    Ok(Json(points))
}

#[derive(Deserialize)]
struct ProcessParams {
    limit: Option<u32>,
}

/// Row shape of the processes endpoint; `threads` is the wire name for the
/// fragment's thread_count.
#[derive(Serialize)]
struct ProcessRow {
    pid: u32,
    name: String,
    cpu_percent: f64,
    memory_mb: f64,
    threads: u32,
    status: String,
}

impl From<ProcessInfo> for ProcessRow {
    fn from(p: ProcessInfo) -> Self {
        Self {
            pid: p.pid,
            name: p.name,
            cpu_percent: p.cpu_percent,
            memory_mb: p.memory_mb,
            threads: p.thread_count,
            status: p.status,
        }
    }
}

async fn processes(
    State(state): State<AppState>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<Vec<ProcessRow>>, ApiError> {
    let limit = params.limit.unwrap_or(15);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::bad_request("invalid_limit", "limit must be in 1..=100"));
    }
    let rows = with_deadline(&state, async {
        state
            .store
            .processes(limit)
            .await
            .map_err(ApiError::store)
    })
    .await?;
    Ok(Json(rows.into_iter().map(ProcessRow::from).collect()))
}

#[derive(Deserialize)]
struct SummaryParams {
    window: Option<i64>,
}

async fn summary(
    State(state): State<AppState>,
    Query(params): Query<SummaryParams>,
) -> Result<Response, ApiError> {
    let window = params.window.unwrap_or(1);
    if !(1..=168).contains(&window) {
        return Err(ApiError::bad_request("invalid_window", "window must be in 1..=168"));
    }
    let stats = with_deadline(&state, async {
        state
            .store
            .summary(Duration::hours(window), Utc::now())
            .await
            .map_err(ApiError::store)
    })
    .await?;
    Ok(Json(stats).into_response())
}

#[derive(Deserialize)]
struct AnomalyParams {
    hours: Option<i64>,
}

async fn anomalies(
    State(state): State<AppState>,
    Query(params): Query<AnomalyParams>,
) -> Result<Json<Vec<crate::models::Anomaly>>, ApiError> {
    let hours = params.hours.unwrap_or(24);
    if !(1..=168).contains(&hours) {
        return Err(ApiError::bad_request("invalid_hours", "hours must be in 1..=168"));
    }
    let now = Utc::now();
    let list = with_deadline(&state, async {
        state
            .store
            .anomalies(now - Duration::hours(hours), now)
            .await
            .map_err(ApiError::store)
    })
    .await?;
    Ok(Json(list))
}

async fn health(State(state): State<AppState>) -> Response {
    Json(state.health.report()).into_response()
}

#[derive(Serialize)]
struct TrainingStatus {
    samples: u64,
    minimum_required: u64,
    hours_collected: f64,
    minimum_hours: f64,
    ready: bool,
    progress_ratio: f64,
    next_steps: Vec<String>,
}

async fn training(State(state): State<AppState>) -> Result<Json<TrainingStatus>, ApiError> {
    let stats = with_deadline(&state, async {
        state.store.stats().await.map_err(ApiError::store)
    })
    .await?;

    let training = &state.config.training;
    let hours_collected = match (stats.oldest, stats.newest) {
        (Some(oldest), Some(newest)) => {
            ((newest - oldest).num_seconds() as f64 / 3600.0 * 10.0).round() / 10.0
        }
        _ => 0.0,
    };
    let samples = stats.samples;
    let ready = samples >= training.minimum_samples && hours_collected >= training.minimum_hours;
    let progress_ratio = (samples as f64 / training.minimum_samples as f64)
        .min(hours_collected / training.minimum_hours)
        .clamp(0.0, 1.0);

    let mut next_steps = Vec::new();
    if samples < training.minimum_samples {
        next_steps.push(format!(
            "collect {} more samples ({samples}/{})",
            training.minimum_samples - samples,
            training.minimum_samples
        ));
    }
    if hours_collected < training.minimum_hours {
        next_steps.push(format!(
            "keep the agent running: {hours_collected:.1}h of {:.1}h collected",
            training.minimum_hours
        ));
    }
    if ready {
        next_steps.push("enough data collected, training can start".to_string());
    }

    Ok(Json(TrainingStatus {
        samples,
        minimum_required: training.minimum_samples,
        hours_collected,
        minimum_hours: training.minimum_hours,
        ready,
        progress_ratio,
        next_steps,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::models::{CpuMetrics, Snapshot};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    async fn test_state(dir: &TempDir) -> AppState {
        let mut config = Config::default();
        config.store.path = dir.path().join("http.db");
        let config = Arc::new(config);
        AppState {
            ring: Arc::new(RingBuffer::new(16, 16)),
            store: Arc::new(Store::open(&config.store).await.unwrap()),
            health: Arc::new(Health::new(5)),
            config,
        }
    }

    async fn spawn_server(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (_tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            // keep the sender alive for the duration of the test process
            let _keep = _tx;
            if let Err(err) = serve(state, listener, rx).await {
                eprintln!("test server error: {err}");
            }
        });
        format!("http://{addr}")
    }

    fn cpu_snapshot(ms: i64, usage: f64) -> Snapshot {
        Snapshot {
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            cpu: Some(CpuMetrics {
                usage_percent: usage,
                frequency_mhz: None,
                per_core_usage: vec![],
                temperature_celsius: None,
                logical_count: 1,
                physical_count: 1,
                load_average: None,
            }),
            ram: None,
            gpu: None,
            disk: None,
            network: None,
            processes: None,
            context: None,
            collection_duration_ms: 5,
            collector_errors: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn current_is_503_until_first_snapshot() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let url = spawn_server(state.clone()).await;

        let resp = reqwest::get(format!("{url}/api/metrics/current")).await.unwrap();
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "no_data");

        state.ring.publish(Arc::new(cpu_snapshot(1_700_000_000_000, 37.5)));
        let resp = reqwest::get(format!("{url}/api/metrics/current")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["cpu"]["usage_percent"], 37.5);
        assert!(body.get("ram").is_none(), "absent fragments stay absent");
    }

    #[tokio::test]
    async fn history_validates_params() {
        let dir = TempDir::new().unwrap();
        let url = spawn_server(test_state(&dir).await).await;

        let resp = reqwest::get(format!("{url}/api/metrics/history?metric=bogus")).await.unwrap();
        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "invalid_metric");

        let resp = reqwest::get(format!(
            "{url}/api/metrics/history?metric=cpu_percent&hours=500"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = reqwest::get(format!(
            "{url}/api/metrics/history?metric=cpu_percent&hours=1&max_points=60"
        ))
        .await
        .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn processes_limit_is_bounded() {
        let dir = TempDir::new().unwrap();
        let url = spawn_server(test_state(&dir).await).await;
        let resp = reqwest::get(format!("{url}/api/metrics/processes?limit=0")).await.unwrap();
        assert_eq!(resp.status(), 400);
        let resp = reqwest::get(format!("{url}/api/metrics/processes?limit=101")).await.unwrap();
        assert_eq!(resp.status(), 400);
        let resp = reqwest::get(format!("{url}/api/metrics/processes")).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn health_is_always_200() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        state.health.record_collector_error("gpu", "unsupported");
        state.health.mark_collector_disabled("gpu");
        let url = spawn_server(state).await;

        let resp = reqwest::get(format!("{url}/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["store"], "ok");
        assert_eq!(body["collectors"]["gpu"]["disabled"], true);
    }

    #[tokio::test]
    async fn training_readiness_formula() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        // 500 of 1000 required samples, spanning 6h of the required 12h
        let base_ms = 1_700_000_000_000i64;
        let step = 6 * 3600 * 1000 / 500;
        for i in 0..500i64 {
            state
                .store
                .write(&cpu_snapshot(base_ms + i * step, 40.0))
                .await
                .unwrap();
        }
        let url = spawn_server(state).await;

        let resp = reqwest::get(format!("{url}/api/status/training")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["samples"], 500);
        assert_eq!(body["minimum_required"], 1000);
        assert_eq!(body["ready"], false);
        let ratio = body["progress_ratio"].as_f64().unwrap();
        assert!((ratio - 0.5).abs() < 0.02, "ratio was {ratio}");
        assert!(!body["next_steps"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_covers_written_metrics() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let now_ms = Utc::now().timestamp_millis();
        for i in 0..20i64 {
            state
                .store
                .write(&cpu_snapshot(now_ms - i * 1000, 40.0 + i as f64))
                .await
                .unwrap();
        }
        let url = spawn_server(state).await;

        let resp = reqwest::get(format!("{url}/api/metrics/summary?window=1")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        let cpu = &body["cpu_percent"];
        assert!(cpu["avg"].is_number());
        assert!(cpu["p95"].as_f64().unwrap() >= cpu["avg"].as_f64().unwrap());
    }
}
