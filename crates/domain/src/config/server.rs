use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_8089")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    /// Maximum number of simultaneously open streams. Further `GET /sse`
    /// requests are answered with 503.
    #[serde(default = "d_max_connections")]
    pub max_connections: usize,
    /// Upper bound on concurrently executing HTTP requests (tower
    /// `ConcurrencyLimitLayer`).
    #[serde(default = "d_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Per-IP token-bucket rate limiting. `None` disables it.
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_8089(),
            host: d_host(),
            max_connections: d_max_connections(),
            max_concurrent_requests: d_max_concurrent_requests(),
            tls: TlsConfig::default(),
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

/// Certificate and key locations.
///
/// Certificates are provisioned by the deployment; the server only checks
/// that the files exist and reports them at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// One token is added every `1 / requests_per_second` seconds.
    pub requests_per_second: u64,
    /// Maximum tokens in the bucket.
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. `http://host:*` matches any port.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_8089() -> u16 {
    8089
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_max_connections() -> usize {
    10
}
fn d_max_concurrent_requests() -> usize {
    256
}
fn d_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:*".into(),
        "http://127.0.0.1:*".into(),
    ]
}
