pub mod config;

use clap::{Args, Parser, Subcommand};
use hamcp_domain::config::Config;

/// hamcp — exposes a home-automation controller to AI clients as tools.
#[derive(Debug, Parser)]
#[command(name = "hamcp", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Serve(ServeArgs),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Default, Args)]
pub struct ServeArgs {
    /// Bind address (overrides `server.host` and `MCP_HOST`).
    #[arg(long)]
    pub host: Option<String>,
    /// Listen port (overrides `server.port` and `MCP_PORT`).
    #[arg(long)]
    pub port: Option<u16>,
    /// Controller base URL (overrides `upstream.base_url` and `HA_URL`).
    #[arg(long)]
    pub ha_url: Option<String>,
    /// Log filter, e.g. `debug` (overrides `LOG_LEVEL`).
    #[arg(long)]
    pub log_level: Option<String>,
    /// Shorthand for `--log-level debug`.
    #[arg(long)]
    pub debug: bool,
}

impl ServeArgs {
    /// Apply command-line flags on top of file and environment values.
    pub fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.ha_url {
            config.upstream.base_url = url.clone();
        }
        if self.debug {
            config.observability.log_level = Some("debug".into());
        } else if let Some(level) = &self.log_level {
            config.observability.log_level = Some(level.to_lowercase());
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `HAMCP_CONFIG` (or `config.toml`
/// by default) and apply the environment overrides. A missing file yields
/// the defaults. Returns the config and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("HAMCP_CONFIG").unwrap_or_else(|_| "config.toml".into());
    let mut config = read_config(&config_path)?;
    let applied = config.apply_env_overrides(|name| std::env::var(name).ok());
    if !applied.is_empty() {
        tracing::debug!(vars = ?applied, "environment overrides applied");
    }
    Ok((config, config_path))
}

fn read_config(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| anyhow::anyhow!("reading {path}: {e}"))?;
    toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {path}: {e}"))
}
