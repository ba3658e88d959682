// HTTP route handlers for the practice judge API

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use practice_common::types::{RunJob, RunReport};
use practice_judge::JudgeState;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub state: JudgeState,
    pub last_run_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<RunReport>,
}

/// POST /run - Execute a submission against its fixtures
///
/// Answers within the deadline with a report, or 409 while another run is
/// in flight. Dropping the request abandons the run.
pub async fn run_code(State(state): State<Arc<AppState>>, Json(job): Json<RunJob>) -> Response {
    let started = Instant::now();
    match state.orchestrator.run(job).await {
        Ok(report) => {
            metrics::record_run(&report, started.elapsed());
            info!(
                run_id = report.run_id,
                outcome = %report.status,
                passed = report.passed_count(),
                total = report.outcomes.len(),
                "Run served"
            );
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(rejected) => {
            metrics::record_rejection();
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({
                    "error": rejected.to_string()
                })),
            )
                .into_response()
        }
    }
}

/// GET /status - Orchestrator state and the current report
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    (
        StatusCode::OK,
        Json(StatusResponse {
            state: orchestrator.state(),
            last_run_id: orchestrator.last_run_id(),
            last_report: orchestrator.current_report(),
        }),
    )
}

/// GET /events - Recent orchestrator lifecycle events
pub async fn get_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.orchestrator.event_log()))
}

/// GET /health - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn get_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
