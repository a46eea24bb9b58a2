use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Base URL used when running under the add-on supervisor.
pub const SUPERVISOR_BASE_URL: &str = "http://supervisor/core";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Controller base URL (no trailing `/api`).
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Environment variable holding a long-lived service token. Used for the
    /// shared event stream and for verifying bearer tokens at connect.
    #[serde(default = "d_token_env")]
    pub token_env: String,
    /// Environment variable set by the add-on supervisor. When present it
    /// wins over `token_env` and switches `base_url` to the supervisor proxy.
    #[serde(default = "d_supervisor_token_env")]
    pub supervisor_token_env: String,
    /// Per-attempt HTTP timeout.
    #[serde(default = "d_30")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub events: EventsConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            token_env: d_token_env(),
            supervisor_token_env: d_supervisor_token_env(),
            request_timeout_secs: d_30(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// Resolved service credentials.
#[derive(Clone)]
pub struct ServiceCredentials {
    pub base_url: String,
    pub token: String,
}

impl std::fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl UpstreamConfig {
    /// Resolve the service token from the environment.
    ///
    /// Returns `None` when neither the supervisor nor the standalone token
    /// variable is set; the event stream is then disabled.
    pub fn service_credentials(&self) -> Option<ServiceCredentials> {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(token) = non_empty(&self.supervisor_token_env) {
            return Some(ServiceCredentials {
                base_url: SUPERVISOR_BASE_URL.into(),
                token,
            });
        }
        non_empty(&self.token_env).map(|token| ServiceCredentials {
            base_url: self.base_url.clone(),
            token,
        })
    }
}

/// Exponential backoff for transient upstream failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "d_500")]
    pub base_delay_ms: u64,
    #[serde(default = "d_8000")]
    pub max_delay_ms: u64,
    /// Retries after the first attempt.
    #[serde(default = "d_3")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: d_500(),
            max_delay_ms: d_8000(),
            max_retries: d_3(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Lifetime of a cached GET response. Accepted range 5–15.
    #[serde(default = "d_10")]
    pub ttl_secs: u64,
    #[serde(default = "d_1000")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: d_10(),
            max_entries: d_1000(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// How many recent events the `ha_events` tool can look back over.
    #[serde(default = "d_100")]
    pub recent_capacity: usize,
    /// Event types subscribed at start-up, before any client asks.
    #[serde(default = "d_default_filters")]
    pub default_filters: Vec<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            recent_capacity: d_100(),
            default_filters: d_default_filters(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "http://localhost:8123".into()
}
fn d_token_env() -> String {
    "HA_TOKEN".into()
}
fn d_supervisor_token_env() -> String {
    "SUPERVISOR_TOKEN".into()
}
fn d_true() -> bool {
    true
}
fn d_3() -> u32 {
    3
}
fn d_10() -> u64 {
    10
}
fn d_30() -> u64 {
    30
}
fn d_100() -> usize {
    100
}
fn d_500() -> u64 {
    500
}
fn d_1000() -> usize {
    1000
}
fn d_8000() -> u64 {
    8000
}
fn d_default_filters() -> Vec<String> {
    vec!["state_changed".into()]
}
