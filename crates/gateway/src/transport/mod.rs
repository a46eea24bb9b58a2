//! Stream transport: one SSE push stream per session plus the companion
//! POST channel.
//!
//! The two sides only meet in the session's bounded outbound queue. The
//! POST side enqueues without blocking; the stream task is the queue's only
//! reader.

pub mod messages;
pub mod sse;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

/// `{ "error": "<message>" }` with the given status.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}
