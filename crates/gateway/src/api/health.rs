use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::state::AppState;

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": if state.is_draining() { "draining" } else { "healthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.sessions.len(),
        "events_connected": state.events.as_ref().map(|hub| hub.is_connected()),
    }))
}
