//! HTTP trigger and statistics API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`, `POST` | `/pipeline/execute` | Run the whole pipeline, return the run report |
//! | `GET`  | `/stats/os-distribution` | Host count per platform |
//! | `GET`  | `/stats/old-vs-new?days_threshold=N` | Hosts last seen before/after the threshold |
//! | `GET`  | `/stats/open-ports` | Host count per open port |
//! | `GET`  | `/stats/open-ports-by-platform?ports=22,80` | Per-platform counts for the given ports |
//!
//! `/pipeline/execute` answers 200 when every source succeeded and 500
//! otherwise, with the same report body in both cases. Only one run is in
//! flight at a time; concurrent requests wait for the running one.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no hosts in normalized_data" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use host_inventory_core::store::HostStore;

use crate::pipeline::{Pipeline, StageReport};
use crate::stats::{self, AgeSplit, InventoryStats, PlatformCount, PortCount};

#[derive(Clone)]
struct AppState {
    /// Held for the duration of a run.
    pipeline: Arc<Mutex<Pipeline>>,
    hosts: Arc<dyn HostStore>,
    stats_collection: String,
    days_threshold: i64,
}

/// Starts the HTTP server on `[server].bind` and runs until terminated.
pub async fn run_server(pipeline: Pipeline) -> anyhow::Result<()> {
    let bind_addr = pipeline.config().server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "server listening");
    println!("hinv server listening on http://{}", bind_addr);

    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

/// Routes over `pipeline`, without binding a socket.
pub fn router(pipeline: Pipeline) -> Router {
    let state = AppState {
        stats_collection: pipeline.config().stats.collection.clone(),
        days_threshold: pipeline.config().stats.days_threshold,
        hosts: pipeline.host_store(),
        pipeline: Arc::new(Mutex::new(pipeline)),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/pipeline/execute",
            get(handle_execute).post(handle_execute),
        )
        .route("/stats/os-distribution", get(handle_os_distribution))
        .route("/stats/old-vs-new", get(handle_old_vs_new))
        .route("/stats/open-ports", get(handle_open_ports))
        .route(
            "/stats/open-ports-by-platform",
            get(handle_open_ports_by_platform),
        )
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{err:#}"), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{err:#}"),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /pipeline/execute ============

#[derive(Serialize)]
struct ExecuteResponse {
    success: bool,
    stages: Vec<StageReport>,
}

async fn handle_execute(State(state): State<AppState>) -> (StatusCode, Json<ExecuteResponse>) {
    let pipeline = state.pipeline.lock().await;
    let report = pipeline.run().await;
    drop(pipeline);

    let success = report.is_success();
    let status = if success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ExecuteResponse {
            success,
            stages: report.stages,
        }),
    )
}

// ============ /stats/* ============

async fn load_stats(state: &AppState) -> Result<InventoryStats, AppError> {
    let stats = stats::collect(&*state.hosts, &state.stats_collection)
        .await
        .map_err(internal)?;
    if stats.hosts == 0 {
        return Err(not_found(format!("no hosts in {}", state.stats_collection)));
    }
    Ok(stats)
}

#[derive(Serialize)]
struct OsDistributionResponse {
    distribution: Vec<PlatformCount>,
}

async fn handle_os_distribution(
    State(state): State<AppState>,
) -> Result<Json<OsDistributionResponse>, AppError> {
    let distribution = load_stats(&state).await?.os_distribution();
    if distribution.is_empty() {
        return Err(not_found("no host reports a platform"));
    }
    Ok(Json(OsDistributionResponse { distribution }))
}

#[derive(Deserialize)]
struct OldVsNewParams {
    days_threshold: Option<i64>,
}

#[derive(Serialize)]
struct OldVsNewResponse {
    days_threshold: i64,
    #[serde(flatten)]
    split: AgeSplit,
}

async fn handle_old_vs_new(
    State(state): State<AppState>,
    Query(params): Query<OldVsNewParams>,
) -> Result<Json<OldVsNewResponse>, AppError> {
    let days = params.days_threshold.unwrap_or(state.days_threshold);
    if days < 0 {
        return Err(bad_request("days_threshold must not be negative"));
    }
    let split = load_stats(&state).await?.old_vs_new(days, Utc::now());
    if split.old + split.new == 0 {
        return Err(not_found("no host reports a last seen time"));
    }
    Ok(Json(OldVsNewResponse {
        days_threshold: days,
        split,
    }))
}

#[derive(Serialize)]
struct OpenPortsResponse {
    ports: Vec<PortCount>,
}

async fn handle_open_ports(
    State(state): State<AppState>,
) -> Result<Json<OpenPortsResponse>, AppError> {
    let ports = load_stats(&state).await?.open_ports();
    if ports.is_empty() {
        return Err(not_found("no host reports open ports"));
    }
    Ok(Json(OpenPortsResponse { ports }))
}

#[derive(Deserialize)]
struct PortsParams {
    ports: Option<String>,
}

#[derive(Serialize)]
struct PortsByPlatformResponse {
    ports: Vec<u16>,
    platforms: BTreeMap<String, BTreeMap<u16, u64>>,
}

async fn handle_open_ports_by_platform(
    State(state): State<AppState>,
    Query(params): Query<PortsParams>,
) -> Result<Json<PortsByPlatformResponse>, AppError> {
    let ports = stats::parse_ports(params.ports.as_deref().unwrap_or(""))
        .map_err(|e| bad_request(e.to_string()))?;
    if ports.is_empty() {
        return Err(bad_request("ports must not be empty"));
    }
    let platforms = load_stats(&state).await?.open_ports_by_platform(&ports);
    if platforms.is_empty() {
        return Err(not_found(format!("no host exposes ports {:?}", ports)));
    }
    Ok(Json(PortsByPlatformResponse { ports, platforms }))
}
