//! Status & operator API
//!
//! - GET /health - Liveness
//! - GET /status - State of both directions, with halt details
//! - GET /metrics - Prometheus metrics
//! - POST /directions/{direction}/resume - Clear a halt after manual reconciliation

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use eyre::{eyre, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::metrics;
use crate::relay::DirectionGuards;
use crate::state::{DirectionState, HaltReason};
use crate::types::{Direction, RequestRecord};

#[derive(Clone)]
pub struct AppState {
    pub guards: DirectionGuards,
    pub started: Instant,
}

impl AppState {
    pub fn new(guards: DirectionGuards) -> Self {
        Self {
            guards,
            started: Instant::now(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub directions: Vec<DirectionStatus>,
}

#[derive(Debug, Serialize)]
pub struct DirectionStatus {
    pub direction: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltInfo>,
}

#[derive(Debug, Serialize)]
pub struct HaltInfo {
    pub kind: String,
    pub detail: String,
    pub since: String,
    /// Destination transaction for the batch, if one was broadcast
    pub proof: Option<String>,
    pub records: Vec<RecordInfo>,
}

#[derive(Debug, Serialize)]
pub struct RecordInfo {
    pub position: u64,
    pub origin: String,
    pub destination: String,
    pub amount: String,
}

#[derive(Debug, Serialize)]
pub struct ResumeResponse {
    pub direction: String,
    pub resumed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleared: Option<HaltInfo>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<&RequestRecord> for RecordInfo {
    fn from(record: &RequestRecord) -> Self {
        Self {
            position: record.position,
            origin: record.origin_account.to_string(),
            destination: record.destination_account.to_string(),
            amount: record.amount.to_string(),
        }
    }
}

impl From<&HaltReason> for HaltInfo {
    fn from(reason: &HaltReason) -> Self {
        Self {
            kind: reason.kind.as_str().to_string(),
            detail: reason.detail.clone(),
            since: reason.since.to_rfc3339(),
            proof: reason.proof.map(|p| p.to_string()),
            records: reason.batch.records().iter().map(RecordInfo::from).collect(),
        }
    }
}

fn direction_status(guards: &DirectionGuards, direction: Direction) -> DirectionStatus {
    let state = guards.get(direction).snapshot();
    DirectionStatus {
        direction: direction.as_str().to_string(),
        state: state.as_str().to_string(),
        halt: match &state {
            DirectionState::Halted(reason) => Some(HaltInfo::from(reason)),
            _ => None,
        },
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let directions: Vec<DirectionStatus> = Direction::ALL
        .iter()
        .map(|d| direction_status(&state.guards, *d))
        .collect();
    let halted = directions.iter().any(|d| d.halt.is_some());

    Json(StatusResponse {
        status: if halted { "degraded" } else { "ok" }.to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        directions,
    })
}

async fn prometheus_metrics() -> Response {
    let (content_type, buffer) = match metrics::render() {
        Ok(rendered) => rendered,
        Err(_) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    };

    match Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

async fn resume(State(state): State<AppState>, Path(direction): Path<String>) -> Response {
    let Some(direction) = Direction::parse(&direction) else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!(
                    "unknown direction '{}', expected coin-to-point or point-to-coin",
                    direction
                ),
            }),
        )
            .into_response();
    };

    match state.guards.get(direction).resume() {
        Some(reason) => {
            warn!(
                %direction,
                kind = reason.kind.as_str(),
                records = reason.batch.len(),
                "Direction resumed via API"
            );
            Json(ResumeResponse {
                direction: direction.as_str().to_string(),
                resumed: true,
                cleared: Some(HaltInfo::from(&reason)),
            })
            .into_response()
        }
        None => (
            StatusCode::CONFLICT,
            Json(ResumeResponse {
                direction: direction.as_str().to_string(),
                resumed: false,
                cleared: None,
            }),
        )
            .into_response(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/metrics", get(prometheus_metrics))
        .route("/directions/{direction}/resume", post(resume))
        .with_state(state)
}

/// Serve the API until the listener fails
pub async fn start_api_server(config: &ApiConfig, guards: DirectionGuards) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .map_err(|e| {
            eyre!(
                "Invalid bind address {}:{}: {}",
                config.bind_address,
                config.port,
                e
            )
        })?;

    let app = router(AppState::new(guards));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server started");
    info!("  /status  - Direction states (JSON)");
    info!("  /metrics - Prometheus metrics");
    info!("  POST /directions/{{direction}}/resume - Clear a halt");

    axum::serve(listener, app).await?;
    Ok(())
}
