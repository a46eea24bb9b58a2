//! HTTP surface: the stream transport routes plus the OAuth redirect target
//! and a liveness probe.

pub mod auth_callback;
pub mod health;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::transport::{messages, sse};

/// Build the full router. The caller attaches state and the outer layers.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sse", get(sse::open_stream))
        .route("/messages", post(messages::post_message))
        .route("/auth/callback", get(auth_callback::callback))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
}
