use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth (authorization-code + PKCE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Externally reachable URL of this server. The redirect target is
    /// `{public_url}/auth/callback`.
    #[serde(default = "d_public_url")]
    pub public_url: String,
    /// OAuth client id. The controller's identity provider expects the
    /// client's own URL, so this defaults to `public_url`.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Browser-facing controller URL for `/auth/authorize`. Defaults to the
    /// upstream base URL; set it when the server reaches the controller
    /// through an internal address the browser cannot resolve.
    #[serde(default)]
    pub authorize_base_url: Option<String>,
    /// Lifetime of a pending grant.
    #[serde(default = "d_600")]
    pub grant_ttl_secs: u64,
    /// Refresh when the access token expires within this many seconds.
    #[serde(default = "d_60")]
    pub refresh_margin_secs: u64,
    /// Adopt `Authorization: Bearer` on the stream request after verifying
    /// the token against the controller.
    #[serde(default = "d_true")]
    pub accept_bearer: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_url: d_public_url(),
            client_id: None,
            authorize_base_url: None,
            grant_ttl_secs: d_600(),
            refresh_margin_secs: d_60(),
            accept_bearer: true,
        }
    }
}

impl AuthConfig {
    pub fn redirect_uri(&self) -> String {
        format!("{}/auth/callback", self.public_url.trim_end_matches('/'))
    }

    pub fn effective_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("{}/", self.public_url.trim_end_matches('/')))
    }
}

fn d_public_url() -> String {
    "http://localhost:8089".into()
}
fn d_600() -> u64 {
    600
}
fn d_60() -> u64 {
    60
}
fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_and_client_id_derive_from_public_url() {
        let cfg: AuthConfig = toml::from_str(r#"public_url = "https://mcp.example.org/""#).unwrap();
        assert_eq!(cfg.redirect_uri(), "https://mcp.example.org/auth/callback");
        assert_eq!(cfg.effective_client_id(), "https://mcp.example.org/");
    }

    #[test]
    fn explicit_client_id_wins() {
        let cfg = AuthConfig {
            client_id: Some("mcp_server".into()),
            ..AuthConfig::default()
        };
        assert_eq!(cfg.effective_client_id(), "mcp_server");
        assert_eq!(cfg.grant_ttl_secs, 600);
        assert_eq!(cfg.refresh_margin_secs, 60);
    }
}
