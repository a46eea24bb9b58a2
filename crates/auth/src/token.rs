//! Token sets and the token endpoint.

use std::time::Duration;

use async_trait::async_trait;
use hamcp_domain::{Error, Result};
use serde::Deserialize;
use tokio::time::Instant;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token set
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tokens bound to one session. `Debug` is manually implemented to redact
/// secrets.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` for tokens without a known lifetime (adopted bearer tokens).
    pub expires_at: Option<Instant>,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl TokenSet {
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    /// Build from an endpoint response. A refresh response without a new
    /// refresh token keeps `previous_refresh`.
    pub fn from_response(resp: TokenResponse, previous_refresh: Option<String>) -> Self {
        let now = Instant::now();
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.or(previous_refresh),
            expires_at: resp.expires_in.map(|secs| now + Duration::from_secs(secs)),
        }
    }

    /// True when the access token expires within `margin`.
    pub fn needs_refresh(&self, margin: Duration) -> bool {
        self.expires_at
            .map_or(false, |at| at <= Instant::now() + margin)
    }
}

/// Response from the token endpoint (both initial grant and refresh).
///
/// `Debug` is manually implemented to redact secrets.
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse>;
}

/// Form-encoded POSTs to `{base}/auth/token`.
pub struct HttpTokenEndpoint {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
}

impl HttpTokenEndpoint {
    pub fn new(base_url: &str, client_id: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building token endpoint client: {e}")))?;
        Ok(Self {
            http,
            token_url: format!("{}/auth/token", base_url.trim_end_matches('/')),
            client_id: client_id.into(),
        })
    }

    async fn post_form(&self, what: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::AuthHandshakeFailed(format!("{what} request failed: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::AuthHandshakeFailed(format!("reading {what} response: {e}")))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), what, "token endpoint refused");
            return Err(Error::AuthHandshakeFailed(format!(
                "{what} returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::AuthHandshakeFailed(format!("parsing {what} response: {e}")))
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        self.post_form(
            "code exchange",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("code_verifier", verifier),
                ("redirect_uri", redirect_uri),
            ],
        )
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.post_form(
            "token refresh",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_tokens() {
        let set = TokenSet {
            access_token: "secret-access".into(),
            refresh_token: Some("secret-refresh".into()),
            expires_at: None,
        };
        let out = format!("{set:?}");
        assert!(!out.contains("secret"));
        assert!(out.contains("[REDACTED]"));

        let resp: TokenResponse = serde_json::from_str(
            r#"{"access_token":"abc","token_type":"Bearer","refresh_token":"def","expires_in":1800}"#,
        )
        .unwrap();
        let out = format!("{resp:?}");
        assert!(!out.contains("abc") && !out.contains("def"));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_window_uses_margin() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","expires_in":120}"#).unwrap();
        let set = TokenSet::from_response(resp, Some("keep".into()));
        assert_eq!(set.refresh_token.as_deref(), Some("keep"));

        let margin = Duration::from_secs(60);
        assert!(!set.needs_refresh(margin));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(set.needs_refresh(margin));
    }

    #[test]
    fn bearer_tokens_never_need_refresh() {
        assert!(!TokenSet::bearer("t").needs_refresh(Duration::from_secs(60)));
    }

    #[test]
    fn token_url_is_derived_from_base() {
        let ep = HttpTokenEndpoint::new("http://ha:8123/", "client", Duration::from_secs(5)).unwrap();
        assert_eq!(ep.token_url, "http://ha:8123/auth/token");
    }
}
