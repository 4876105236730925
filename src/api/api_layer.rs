// Internal HTTP API. Shares the attendance service with the Discord layer.

pub mod api_error;
pub mod attendance_routes;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::core::attendance::AttendanceService;
use crate::infra::attendance::SqliteAttendanceStore;

#[derive(Clone)]
pub struct AppState {
    pub attendance: Arc<AttendanceService<SqliteAttendanceStore>>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(attendance_routes::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// Bind `0.0.0.0:port` and serve until the process exits.
pub async fn serve(state: AppState, port: u16) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "HTTP API listening");
    axum::serve(listener, create_router(state)).await
}
