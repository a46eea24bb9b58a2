//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use hamcp_auth::{AuthManager, HttpTokenEndpoint, TokenEndpoint};
use hamcp_domain::config::{Config, ConfigSeverity};
use hamcp_sessions::SessionManager;
use hamcp_tools::{register_builtin, ToolRegistry};
use hamcp_upstream::{
    EventHub, EventStream, ReqwestTransport, ResponseCache, RetryPolicy, Transport, UpstreamClient,
};
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Validate config, build the real upstream transport and token endpoint,
/// and return a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Upstream transport & token endpoint ──────────────────────────
    let timeout = Duration::from_secs(config.upstream.request_timeout_secs);
    let transport = Arc::new(
        ReqwestTransport::new(&config.upstream.base_url, timeout)
            .context("creating upstream HTTP client")?,
    );
    let endpoint = Arc::new(
        HttpTokenEndpoint::new(
            &config.upstream.base_url,
            config.auth.effective_client_id(),
            timeout,
        )
        .context("creating token endpoint client")?,
    );

    // ── Event hub (only with a service token) ────────────────────────
    let events = if !config.upstream.events.enabled {
        tracing::info!("upstream event stream disabled by config");
        None
    } else if config.upstream.service_credentials().is_none() {
        tracing::info!(
            token_env = %config.upstream.token_env,
            "no service token configured, upstream event stream disabled"
        );
        None
    } else {
        Some(EventHub::new(config.upstream.events.recent_capacity))
    };

    assemble(config, transport, endpoint, events)
}

/// Wire an [`AppState`] from already-built collaborators.
pub fn assemble(
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    endpoint: Arc<dyn TokenEndpoint>,
    events: Option<Arc<EventHub>>,
) -> anyhow::Result<AppState> {
    // ── Upstream client ──────────────────────────────────────────────
    let cache = ResponseCache::from_config(&config.upstream.cache);
    let client = Arc::new(UpstreamClient::new(
        transport,
        RetryPolicy::from(&config.upstream.retry),
        cache,
    ));
    tracing::info!(
        base_url = %config.upstream.base_url,
        cache = config.upstream.cache.enabled,
        max_retries = config.upstream.retry.max_retries,
        "upstream client ready"
    );

    // ── Auth ─────────────────────────────────────────────────────────
    let auth = Arc::new(AuthManager::new(&config.auth, &config.upstream.base_url, endpoint));
    tracing::info!(
        redirect_uri = %config.auth.redirect_uri(),
        accept_bearer = config.auth.accept_bearer,
        "auth manager ready"
    );

    // ── Tools ────────────────────────────────────────────────────────
    if let Some(hub) = &events {
        for filter in &config.upstream.events.default_filters {
            hub.subscribe(filter);
        }
    }
    let mut registry = ToolRegistry::from_config(&config.tools);
    register_builtin(&mut registry, client.clone(), events.clone())
        .context("registering built-in tools")?;
    tracing::info!(
        tools = registry.len(),
        workers = config.tools.worker_pool_size,
        "tool registry ready"
    );

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::from_config(
        &config.sessions,
        config.server.max_connections,
    ));

    Ok(AppState::new(
        config,
        client,
        events,
        sessions,
        auth,
        Arc::new(registry),
    ))
}

/// Spawn the reaper and, when a service token is configured, the upstream
/// event stream. Both stop when `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) -> anyhow::Result<Vec<JoinHandle<()>>> {
    let mut handles = vec![crate::reaper::spawn(state.clone())];

    if let Some(hub) = &state.events {
        let creds = state
            .config
            .upstream
            .service_credentials()
            .context("service token disappeared from the environment")?;
        let stream = EventStream::new(
            hub.clone(),
            &creds.base_url,
            creds.token,
            RetryPolicy::from(&state.config.upstream.retry),
        )
        .context("configuring upstream event stream")?
        .with_client(state.client.clone());
        handles.push(
            stream
                .spawn(state.shutdown.child_token())
                .context("starting upstream event stream")?,
        );
        tracing::info!(base_url = %creds.base_url, "upstream event stream started");
    }

    Ok(handles)
}
