use crate::handlers;
use crate::AppState;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/run", post(handlers::run_code))
        .route("/status", get(handlers::get_status))
        .route("/events", get(handlers::get_events))
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::get_metrics))
}
