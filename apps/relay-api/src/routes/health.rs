use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// False while the message store is unreachable and sends are halted.
    pub accepting_sends: bool,
    pub sessions: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        accepting_sends: state.hub.broadcast.is_accepting(),
        sessions: state.hub.sessions.len(),
    })
}
