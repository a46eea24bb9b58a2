use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hamcp_auth::AuthManager;
use hamcp_domain::config::Config;
use hamcp_sessions::SessionManager;
use hamcp_tools::ToolRegistry;
use hamcp_upstream::{EventHub, UpstreamClient};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Shared application state passed to all handlers.
///
/// Fields are grouped by concern:
/// - **Core** — config, upstream client, event hub
/// - **Sessions & auth** — session table, per-session tokens
/// - **Dispatch** — tool registry, worker pool
/// - **Lifecycle** — drain flag, shutdown token
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub client: Arc<UpstreamClient>,
    /// `None` when no service token is configured or events are disabled.
    pub events: Option<Arc<EventHub>>,

    // ── Sessions & auth ───────────────────────────────────────────────
    pub sessions: Arc<SessionManager>,
    pub auth: Arc<AuthManager>,

    // ── Dispatch ──────────────────────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
    /// Permits for running tool handlers.
    pub workers: Arc<Semaphore>,

    // ── Lifecycle ─────────────────────────────────────────────────────
    draining: Arc<AtomicBool>,
    /// Cancelled once shutdown has closed every session. Background tasks
    /// stop on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        client: Arc<UpstreamClient>,
        events: Option<Arc<EventHub>>,
        sessions: Arc<SessionManager>,
        auth: Arc<AuthManager>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.tools.worker_pool_size.max(1)));
        Self {
            config,
            client,
            events,
            sessions,
            auth,
            tools,
            workers,
            draining: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Refuse new streams and new requests from now on.
    pub fn begin_drain(&self) {
        if !self.draining.swap(true, Ordering::SeqCst) {
            tracing::info!(
                sessions = self.sessions.len(),
                in_flight = self.sessions.total_in_flight(),
                "draining"
            );
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}
