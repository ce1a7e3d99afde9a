//! HTTP routes for bridge status

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::scheduler::{BridgeStatus, StatusHandle};

#[derive(Clone)]
pub struct AppState { pub status: StatusHandle, pub service: String }

impl AppState {
    pub fn new(status: StatusHandle, service: impl Into<String>) -> Self {
        Self { status, service: service.into() }
    }
}

pub fn create_router(status: StatusHandle) -> Router { create_router_with_name(status, "smartdoor") }

pub fn create_router_with_name(status: StatusHandle, service: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(bridge_status))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(status, service))
}

async fn health(State(s): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": s.service}))
}

async fn bridge_status(State(s): State<AppState>) -> Json<BridgeStatus> {
    Json(s.status.snapshot())
}
