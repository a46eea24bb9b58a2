//! `GET /auth/callback`: the OAuth2 redirect target.
//!
//! The `state` parameter is the only link back to a session. A mismatched,
//! expired or replayed state is refused before the token endpoint is
//! contacted. Only an expired state names its session, which drops back to
//! unauthenticated; any other refusal leaves every session untouched.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use hamcp_domain::Error;
use hamcp_protocol::messages::{NOTIFY_AUTH_COMPLETED, NOTIFY_AUTH_FAILED};
use hamcp_protocol::Frame;
use hamcp_sessions::SessionState;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub async fn callback(State(app): State<AppState>, Query(query): Query<CallbackQuery>) -> Response {
    if let Some(error) = &query.error {
        tracing::warn!(
            error = %error,
            description = query.error_description.as_deref().unwrap_or(""),
            "authorization server returned an error"
        );
        return page(StatusCode::BAD_REQUEST, "Sign-in was declined", error);
    }
    let (Some(code), Some(state)) = (query.code.as_deref(), query.state.as_deref()) else {
        return page(
            StatusCode::BAD_REQUEST,
            "Sign-in failed",
            "the callback is missing its code or state parameter",
        );
    };

    let grant = match app.auth.redeem(state, code) {
        Ok(grant) => grant,
        Err(rejected) => {
            let stranded = rejected.expired_session().map(str::to_owned);
            let e = Error::from(rejected);
            if let Some(session_id) = stranded {
                handshake_failed(&app, &session_id, &e);
            }
            return page(StatusCode::UNAUTHORIZED, "Sign-in failed", &e.client_message());
        }
    };
    let session_id = grant.session_id.clone();

    match app.auth.exchange(&grant).await {
        Ok(()) => {
            if let Err(e) = app.sessions.transition(&session_id, SessionState::Authenticated) {
                // The session went away while the user was signing in.
                tracing::info!(session_id = %session_id, error = %e, "discarding tokens for a closed session");
                app.auth.revoke(&session_id);
                return page(StatusCode::UNAUTHORIZED, "Sign-in failed", "the session has ended");
            }
            let _ = app.sessions.notify(
                &session_id,
                Frame::notification(NOTIFY_AUTH_COMPLETED, json!({ "session_id": session_id })),
            );
            page(
                StatusCode::OK,
                "Signed in",
                "You can close this window and return to your assistant.",
            )
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "code exchange failed");
            handshake_failed(&app, &session_id, &e);
            page(StatusCode::UNAUTHORIZED, "Sign-in failed", &e.client_message())
        }
    }
}

/// Return an authenticating session to unauthenticated and tell its client.
fn handshake_failed(app: &AppState, session_id: &str, e: &Error) {
    if app
        .sessions
        .transition(session_id, SessionState::Unauthenticated)
        .is_err()
    {
        return;
    }
    let _ = app.sessions.notify(
        session_id,
        Frame::notification(NOTIFY_AUTH_FAILED, json!({ "reason": e.client_message() })),
    );
}

fn page(status: StatusCode, title: &str, detail: &str) -> Response {
    let body = format!(
        "<!doctype html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{}</p></body></html>",
        escape(detail)
    );
    (status, Html(body)).into_response()
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
