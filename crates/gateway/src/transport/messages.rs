use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hamcp_protocol::Frame;
use hamcp_sessions::RequestRejected;
use serde::Deserialize;

use super::api_error;
use crate::engine::{self, Rejection};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MessagesQuery {
    session_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /messages?session_id=<id>
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn post_message(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
    body: String,
) -> Response {
    if state.is_draining() {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    if state.sessions.state(&query.session_id).is_none() {
        return api_error(StatusCode::NOT_FOUND, "unknown session");
    }

    let frame = match Frame::decode(&body) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(session_id = %query.session_id, error = %e, "unparsable frame");
            return api_error(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match engine::accept(&state, &query.session_id, frame) {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(rejection) => {
            let status = match &rejection {
                Rejection::Session(RequestRejected::Duplicate(_)) => StatusCode::CONFLICT,
                Rejection::Session(RequestRejected::UnknownSession | RequestRejected::NotOpen) => {
                    StatusCode::NOT_FOUND
                }
                Rejection::UnexpectedFrame => StatusCode::BAD_REQUEST,
                Rejection::Draining => StatusCode::SERVICE_UNAVAILABLE,
            };
            tracing::debug!(
                session_id = %query.session_id,
                status = status.as_u16(),
                error = %rejection,
                "frame rejected"
            );
            api_error(status, rejection.to_string())
        }
    }
}
