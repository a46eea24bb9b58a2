//! Periodic housekeeping: idle sessions, expired grants, stale cache entries.

use std::time::Duration;

use hamcp_protocol::messages::NOTIFY_AUTH_EXPIRED;
use hamcp_protocol::Frame;
use hamcp_sessions::SessionState;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::state::AppState;

pub fn spawn(state: AppState) -> JoinHandle<()> {
    let every = Duration::from_secs(state.config.sessions.reap_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => sweep(&state),
            }
        }
        tracing::debug!("reaper stopped");
    })
}

/// One housekeeping pass.
pub fn sweep(state: &AppState) {
    let idle = state.sessions.reap_idle();
    if !idle.is_empty() {
        tracing::info!(count = idle.len(), "idle sessions closed");
    }

    for session_id in state.auth.purge_expired_grants() {
        if state.sessions.state(&session_id) != Some(SessionState::Authenticating) {
            continue;
        }
        if state
            .sessions
            .transition(&session_id, SessionState::Unauthenticated)
            .is_ok()
        {
            let frame = Frame::notification(
                NOTIFY_AUTH_EXPIRED,
                json!({ "reason": "authorization grant expired before the callback arrived" }),
            );
            let _ = state.sessions.notify(&session_id, frame);
            tracing::info!(session_id = %session_id, "pending authorization expired");
        }
    }

    if let Some(cache) = state.client.cache() {
        let purged = cache.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expired cache entries purged");
        }
    }
}
