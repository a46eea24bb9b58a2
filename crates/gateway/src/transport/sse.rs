use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use hamcp_protocol::messages::{
    HandshakeParams, ServerCapabilities, ServerInfo, SessionCancelledParams, NOTIFY_HANDSHAKE,
    NOTIFY_SESSION_CANCELLED, PROTOCOL_NAME,
};
use hamcp_protocol::sse::{EVENT_ENDPOINT, EVENT_MESSAGE};
use hamcp_protocol::Frame;
use hamcp_sessions::{CloseReason, SessionHandle, SessionState};
use hamcp_upstream::CallContext;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::api_error;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /sse
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if state.is_draining() {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "server is shutting down");
    }
    let handle = match state.sessions.create() {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(error = %e, "stream refused");
            return api_error(StatusCode::SERVICE_UNAVAILABLE, e.client_message());
        }
    };
    let SessionHandle {
        id,
        cancel,
        outbound,
    } = handle;
    // From here on the guard owns cleanup, whatever happens to the response.
    let guard = StreamGuard {
        state: state.clone(),
        session_id: id.clone(),
    };

    let authenticated = match bearer_token(&headers) {
        Some(token) if state.config.auth.accept_bearer => adopt_bearer(&state, &id, token).await,
        _ => false,
    };
    let next = if authenticated {
        SessionState::Authenticated
    } else {
        SessionState::Unauthenticated
    };
    if let Err(e) = state.sessions.transition(&id, next) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.client_message());
    }

    let handshake = HandshakeParams {
        protocol: PROTOCOL_NAME.into(),
        version: ServerInfo::current().version,
        session_id: id.clone(),
        capabilities: ServerCapabilities::default(),
        authenticated,
    };
    let frame = match serde_json::to_value(&handshake) {
        Ok(params) => Frame::notification(NOTIFY_HANDSHAKE, params),
        Err(e) => return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };
    if let Err(e) = state.sessions.notify(&id, frame) {
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    tracing::info!(session_id = %id, authenticated, "stream opened");
    let keepalive = Duration::from_secs(state.config.sessions.keepalive_secs.max(1));
    let endpoint = format!("/messages?session_id={id}");
    Sse::new(session_events(guard, endpoint, outbound, cancel))
        .keep_alive(KeepAlive::new().interval(keepalive).text("keep-alive"))
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify a connect-time bearer token against the controller and bind it.
async fn adopt_bearer(state: &AppState, session_id: &str, token: &str) -> bool {
    match state.client.api_status(CallContext::new(token)).await {
        Ok(_) => {
            state.auth.adopt_bearer(session_id, token).await;
            true
        }
        Err(e) => {
            tracing::warn!(session_id, error = %e, "bearer token rejected, continuing unauthenticated");
            false
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Writer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Releases everything held for the session when the stream is dropped,
/// whether it ended normally or the client went away.
struct StreamGuard {
    state: AppState,
    session_id: String,
}

impl StreamGuard {
    fn close_reason(&self) -> CloseReason {
        self.state
            .sessions
            .close_reason(&self.session_id)
            .unwrap_or(CloseReason::Disconnected)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.sessions.remove(&self.session_id);
        self.state.auth.revoke(&self.session_id);
        if let Some(hub) = &self.state.events {
            hub.release_session(&self.session_id);
        }
    }
}

fn session_events(
    guard: StreamGuard,
    endpoint: String,
    mut outbound: mpsc::Receiver<Frame>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        yield Ok(Event::default().event(EVENT_ENDPOINT).data(endpoint));

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                frame = outbound.recv() => frame,
            };
            match next {
                Some(frame) => {
                    if let Some(event) = message_event(&frame) {
                        yield Ok(event);
                    }
                }
                None => break,
            }
        }

        let reason = guard.close_reason();
        if reason.drains_queue() {
            while let Ok(frame) = outbound.try_recv() {
                if let Some(event) = message_event(&frame) {
                    yield Ok(event);
                }
            }
        }
        let params = SessionCancelledParams {
            reason: reason.as_str().into(),
        };
        if let Ok(params) = serde_json::to_value(params) {
            if let Some(event) = message_event(&Frame::notification(NOTIFY_SESSION_CANCELLED, params)) {
                yield Ok(event);
            }
        }
        tracing::info!(session_id = %guard.session_id, reason = %reason, "stream ended");
    }
}

fn message_event(frame: &Frame) -> Option<Event> {
    match frame.encode() {
        Ok(data) => Some(Event::default().event(EVENT_MESSAGE).data(data)),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            None
        }
    }
}
