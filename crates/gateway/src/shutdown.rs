//! Graceful drain.
//!
//! New streams and requests are refused first. In-flight requests get the
//! configured grace period to finish; whatever is left is cancelled when
//! the sessions close. Each stream flushes its queue and ends with a
//! `session/cancelled` notification.

use std::time::Duration;

use hamcp_sessions::CloseReason;
use tokio::time::Instant;

use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub async fn drain(state: &AppState) {
    state.begin_drain();

    let grace = Duration::from_secs(state.config.sessions.shutdown_grace_secs);
    let deadline = Instant::now() + grace;
    loop {
        let in_flight = state.sessions.total_in_flight();
        if in_flight == 0 {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!(in_flight, "grace period over, cancelling remaining requests");
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let closed = state.sessions.close_all(CloseReason::Shutdown);
    tracing::info!(closed, "sessions closed for shutdown");
    state.shutdown.cancel();
}

/// Wait for SIGINT or SIGTERM.
pub async fn signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        tokio::select! {
            _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
            _ = sigterm => tracing::info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        tracing::info!("received SIGINT, shutting down");
    }
}
