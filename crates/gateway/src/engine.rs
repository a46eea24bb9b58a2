//! Request dispatch.
//!
//! [`accept`] runs on the POST handler: it admits the frame against the
//! session table synchronously (so duplicate ids are refused before the
//! HTTP reply) and spawns the actual work. Replies travel back through the
//! session's outbound queue, never through the POST response.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use hamcp_domain::{Error, ErrorKind, Result};
use hamcp_protocol::messages::{
    CancelledParams, InitializeResult, ProgressParams, ServerCapabilities, ServerInfo,
    ToolCallParams, ToolCallResult, ToolsListResult, METHOD_AUTH_LOGOUT, METHOD_INITIALIZE,
    METHOD_PING, METHOD_TOOLS_CALL, METHOD_TOOLS_LIST, NOTIFY_CANCELLED, NOTIFY_PROGRESS,
    PROTOCOL_VERSION,
};
use hamcp_protocol::{Frame, RequestId};
use hamcp_sessions::{CloseReason, RequestRejected, SessionState};
use hamcp_tools::{Invocation, ProgressSink};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Why a frame was refused at the door.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Session(#[from] RequestRejected),
    #[error("clients may only send requests and notifications")]
    UnexpectedFrame,
    #[error("server is shutting down")]
    Draining,
}

/// Admit one client frame for `session_id`.
pub fn accept(state: &AppState, session_id: &str, frame: Frame) -> std::result::Result<(), Rejection> {
    if state.is_draining() {
        return Err(Rejection::Draining);
    }

    match frame {
        Frame::Request { id, method, params } => {
            let ordered = !(method == METHOD_TOOLS_CALL && is_streaming_call(state, &params));
            let cancel = state.sessions.begin_request(session_id, &id, ordered)?;
            tracing::debug!(
                session_id,
                request_id = %id,
                method = %method,
                ordered,
                "request admitted"
            );
            let state = state.clone();
            let session_id = session_id.to_owned();
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(handle(&state, &session_id, &id, &method, params, cancel))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(
                            session_id = %session_id,
                            request_id = %id,
                            method = %method,
                            "request handler panicked"
                        );
                        Err(Error::Other("request handler panicked".into()))
                    });
                let frame = match outcome {
                    Ok(result) => Frame::response(id.clone(), result),
                    Err(e) => Frame::error(Some(id.clone()), &e),
                };
                if let Err(e) = state.sessions.complete(&session_id, &id, frame) {
                    tracing::debug!(session_id = %session_id, request_id = %id, error = %e, "reply dropped");
                }
                if method == METHOD_AUTH_LOGOUT {
                    state.sessions.close(&session_id, CloseReason::Logout);
                }
            });
            Ok(())
        }
        Frame::Notification { method, params } => {
            state.sessions.touch(session_id);
            if method == NOTIFY_CANCELLED {
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(p) => {
                        let found = state.sessions.cancel_request(session_id, &p.request_id);
                        tracing::info!(
                            session_id,
                            request_id = %p.request_id,
                            found,
                            reason = p.reason.as_deref().unwrap_or(""),
                            "client cancelled request"
                        );
                    }
                    Err(e) => tracing::debug!(session_id, error = %e, "malformed cancel notification"),
                }
            } else {
                tracing::debug!(session_id, method = %method, "ignoring client notification");
            }
            Ok(())
        }
        Frame::Response { .. } | Frame::Error { .. } => Err(Rejection::UnexpectedFrame),
    }
}

fn is_streaming_call(state: &AppState, params: &Value) -> bool {
    params
        .get("name")
        .and_then(Value::as_str)
        .is_some_and(|name| state.tools.is_streaming(name))
}

async fn handle(
    state: &AppState,
    session_id: &str,
    id: &RequestId,
    method: &str,
    params: Value,
    cancel: CancellationToken,
) -> Result<Value> {
    match method {
        METHOD_INITIALIZE => Ok(serde_json::to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.into(),
            server_info: ServerInfo::current(),
            capabilities: ServerCapabilities::default(),
            session_id: session_id.to_owned(),
        })?),
        METHOD_PING => Ok(json!({})),
        METHOD_TOOLS_LIST => Ok(serde_json::to_value(ToolsListResult {
            tools: state.tools.list(),
        })?),
        METHOD_AUTH_LOGOUT => {
            state.auth.revoke(session_id);
            Ok(json!({ "logged_out": true }))
        }
        METHOD_TOOLS_CALL => call_tool(state, session_id, id, params, cancel).await,
        other => Err(Error::MethodNotFound(other.to_owned())),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// tools/call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn call_tool(
    state: &AppState,
    session_id: &str,
    id: &RequestId,
    params: Value,
    cancel: CancellationToken,
) -> Result<Value> {
    let params: ToolCallParams =
        serde_json::from_value(params).map_err(|e| Error::validation("params", e.to_string()))?;

    require_auth(state, session_id)?;
    let resolved = state.tools.resolve(&params.name, params.arguments)?;

    let token = match state.auth.ensure_fresh(session_id).await {
        Ok(token) => token,
        Err(e) => {
            revert_to_unauthenticated(state, session_id, &e);
            return Err(e);
        }
    };

    let _permit = tokio::select! {
        permit = state.workers.clone().acquire_owned() => {
            permit.map_err(|_| Error::Unavailable("worker pool closed".into()))?
        }
        _ = cancel.cancelled() => return Err(Error::Cancelled("cancelled while queued".into())),
    };

    let progress = resolved
        .descriptor
        .streaming
        .then(|| progress_sink(state, session_id, id));
    let invocation = Invocation {
        session_id: session_id.to_owned(),
        request_id: id.clone(),
        token,
        cancel,
        progress,
    };

    match state.tools.invoke(resolved, invocation).await {
        Ok(value) => Ok(serde_json::to_value(ToolCallResult::from_value(value))?),
        Err(e) => {
            if e.kind() == ErrorKind::AuthRequired {
                revert_to_unauthenticated(state, session_id, &e);
            }
            Err(e)
        }
    }
}

/// Gate a tool call on the session state. An unauthenticated session gets
/// a grant (reused while one is live) and moves to `Authenticating`.
fn require_auth(state: &AppState, session_id: &str) -> Result<()> {
    match state.sessions.state(session_id) {
        Some(SessionState::Authenticated) => Ok(()),
        Some(current @ (SessionState::Unauthenticated | SessionState::Authenticating)) => {
            let url = state.auth.begin(session_id)?;
            if current == SessionState::Unauthenticated {
                enter_authenticating(state, session_id)?;
            }
            Err(Error::AuthRequired {
                message: "open the authorization URL to sign in to the controller".into(),
                authorization_url: Some(url),
            })
        }
        Some(SessionState::Connecting) => Err(Error::Unavailable("session is still connecting".into())),
        Some(SessionState::Closing | SessionState::Closed) | None => {
            Err(Error::Cancelled("session is closing".into()))
        }
    }
}

/// Move the session to `Authenticating`. A concurrent call that got there
/// first counts as success.
fn enter_authenticating(state: &AppState, session_id: &str) -> Result<()> {
    match state
        .sessions
        .transition(session_id, SessionState::Authenticating)
    {
        Ok(_) => Ok(()),
        Err(_) if state.sessions.state(session_id) == Some(SessionState::Authenticating) => Ok(()),
        Err(e) => Err(e),
    }
}

fn revert_to_unauthenticated(state: &AppState, session_id: &str, cause: &Error) {
    state.auth.revoke(session_id);
    if state
        .sessions
        .transition(session_id, SessionState::Unauthenticated)
        .is_ok()
    {
        tracing::warn!(session_id, error = %cause, "session lost its credentials");
    }
}

fn progress_sink(state: &AppState, session_id: &str, id: &RequestId) -> ProgressSink {
    let sessions = state.sessions.clone();
    let session_id = session_id.to_owned();
    let request_id = id.clone();
    Arc::new(move |progress: Value| {
        let params = ProgressParams {
            request_id: request_id.clone(),
            progress,
        };
        let frame = match serde_json::to_value(params) {
            Ok(params) => Frame::notification(NOTIFY_PROGRESS, params),
            Err(_) => return,
        };
        let _ = sessions.notify(&session_id, frame);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hamcp_auth::{TokenEndpoint, TokenResponse};
    use hamcp_domain::config::Config;
    use hamcp_upstream::{Transport, TransportFailure, UpstreamRequest, UpstreamResponse};

    struct Offline;

    #[async_trait]
    impl Transport for Offline {
        async fn send(
            &self,
            _request: &UpstreamRequest,
            _token: &str,
        ) -> std::result::Result<UpstreamResponse, TransportFailure> {
            Err(TransportFailure::Connect("offline".into()))
        }
    }

    #[async_trait]
    impl TokenEndpoint for Offline {
        async fn exchange_code(&self, _: &str, _: &str, _: &str) -> Result<TokenResponse> {
            Err(Error::AuthHandshakeFailed("offline".into()))
        }
        async fn refresh(&self, _: &str) -> Result<TokenResponse> {
            Err(Error::AuthHandshakeFailed("offline".into()))
        }
    }

    fn app() -> AppState {
        let mut config = Config::default();
        config.upstream.events.enabled = false;
        crate::bootstrap::assemble(Arc::new(config), Arc::new(Offline), Arc::new(Offline), None)
            .unwrap()
    }

    #[tokio::test]
    async fn session_already_authenticating_is_not_an_error() {
        let app = app();
        let h = app.sessions.create().unwrap();
        app.sessions
            .transition(&h.id, SessionState::Unauthenticated)
            .unwrap();
        // Another call moved the session between our read and our write.
        app.sessions
            .transition(&h.id, SessionState::Authenticating)
            .unwrap();

        assert!(enter_authenticating(&app, &h.id).is_ok());
        assert_eq!(
            app.sessions.state(&h.id),
            Some(SessionState::Authenticating)
        );
        assert!(enter_authenticating(&app, "no-such-session").is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_unauthenticated_calls_all_get_auth_required() {
        let app = app();
        let h = app.sessions.create().unwrap();
        app.sessions
            .transition(&h.id, SessionState::Unauthenticated)
            .unwrap();

        let calls: Vec<_> = (0..16)
            .map(|_| {
                let app = app.clone();
                let id = h.id.clone();
                tokio::spawn(async move { require_auth(&app, &id) })
            })
            .collect();
        let mut urls = Vec::new();
        for call in calls {
            match call.await.unwrap() {
                Err(Error::AuthRequired {
                    authorization_url, ..
                }) => urls.push(authorization_url),
                other => panic!("expected AuthRequired, got {other:?}"),
            }
        }
        urls.dedup();
        assert_eq!(urls.len(), 1);
        assert_eq!(
            app.sessions.state(&h.id),
            Some(SessionState::Authenticating)
        );
    }
}
