mod auth;
mod observability;
mod server;
mod sessions;
mod tools;
mod upstream;

pub use auth::*;
pub use observability::*;
pub use server::*;
pub use sessions::*;
pub use tools::*;
pub use upstream::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Apply the add-on environment variables (`MCP_HOST`, `MCP_PORT`,
    /// `HA_URL`, `LOG_LEVEL`) on top of the file values.
    ///
    /// `lookup` is `std::env::var` in production. Returns the names of
    /// the variables that were applied.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Vec<&'static str>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut applied = Vec::new();

        if let Some(host) = lookup("MCP_HOST").filter(|v| !v.is_empty()) {
            self.server.host = host;
            applied.push("MCP_HOST");
        }
        if let Some(port) = lookup("MCP_PORT").and_then(|v| v.parse::<u16>().ok()) {
            self.server.port = port;
            applied.push("MCP_PORT");
        }
        if let Some(url) = lookup("HA_URL").filter(|v| !v.is_empty()) {
            self.upstream.base_url = url;
            applied.push("HA_URL");
        }
        if let Some(level) = lookup("LOG_LEVEL").filter(|v| !v.is_empty()) {
            self.observability.log_level = Some(level.to_lowercase());
            applied.push("LOG_LEVEL");
        }

        applied
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn error(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Error,
        field: field.into(),
        message: message.into(),
    }
}

fn warning(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError {
        severity: ConfigSeverity::Warning,
        field: field.into(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(error("server.host", "host must not be empty"));
        }
        if self.server.max_connections == 0 {
            errors.push(error(
                "server.max_connections",
                "at least one connection must be allowed",
            ));
        }

        let tls = &self.server.tls;
        if tls.enabled {
            for (field, path) in [("server.tls.cert_path", &tls.cert_path), ("server.tls.key_path", &tls.key_path)] {
                match path {
                    None => errors.push(error(field, "required when tls.enabled = true")),
                    Some(p) if !p.exists() => {
                        errors.push(error(field, format!("{} does not exist", p.display())))
                    }
                    Some(_) => {}
                }
            }
            errors.push(warning(
                "server.tls",
                "TLS is terminated by the ingress in front of this server; the listener itself speaks plain HTTP",
            ));
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*" {
            errors.push(warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        if !self.upstream.base_url.starts_with("http://") && !self.upstream.base_url.starts_with("https://") {
            errors.push(error(
                "upstream.base_url",
                "must start with http:// or https://",
            ));
        }

        let retry = &self.upstream.retry;
        if retry.base_delay_ms == 0 {
            errors.push(error("upstream.retry.base_delay_ms", "must be greater than 0"));
        }
        if retry.max_delay_ms < retry.base_delay_ms {
            errors.push(error(
                "upstream.retry.max_delay_ms",
                "must be at least base_delay_ms",
            ));
        }

        let cache = &self.upstream.cache;
        if cache.enabled && !(5..=15).contains(&cache.ttl_secs) {
            errors.push(error(
                "upstream.cache.ttl_secs",
                format!("{} is outside the accepted 5–15 second range", cache.ttl_secs),
            ));
        }
        if cache.enabled && cache.max_entries == 0 {
            errors.push(error("upstream.cache.max_entries", "must be greater than 0"));
        }

        if self.auth.grant_ttl_secs == 0 {
            errors.push(error("auth.grant_ttl_secs", "must be greater than 0"));
        }
        if !self.auth.public_url.starts_with("http://") && !self.auth.public_url.starts_with("https://") {
            errors.push(error("auth.public_url", "must start with http:// or https://"));
        }

        let sessions = &self.sessions;
        if sessions.outbound_queue == 0 {
            errors.push(error("sessions.outbound_queue", "must be greater than 0"));
        }
        if sessions.keepalive_secs == 0 {
            errors.push(error("sessions.keepalive_secs", "must be greater than 0"));
        }
        if sessions.idle_timeout_secs <= sessions.keepalive_secs {
            errors.push(warning(
                "sessions.idle_timeout_secs",
                "idle timeout at or below the keep-alive interval closes sessions between pings",
            ));
        }
        if sessions.reap_interval_secs == 0 {
            errors.push(error("sessions.reap_interval_secs", "must be greater than 0"));
        }

        if self.tools.default_timeout_secs == 0 {
            errors.push(error("tools.default_timeout_secs", "must be greater than 0"));
        }
        if self.tools.worker_pool_size == 0 {
            errors.push(error("tools.worker_pool_size", "must be greater than 0"));
        }
        for (name, secs) in &self.tools.timeouts {
            if *secs == 0 {
                errors.push(error(&format!("tools.timeouts.{name}"), "must be greater than 0"));
            }
        }

        errors
    }
}
