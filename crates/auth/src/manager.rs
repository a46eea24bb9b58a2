//! [`AuthManager`]: per-session tokens and the handshake that issues them.
//!
//! Each session owns one slot: an async mutex around its optional
//! [`TokenSet`]. [`AuthManager::ensure_fresh`] holds that mutex across the
//! expiry check and any refresh, so concurrent callers on one session
//! trigger at most one refresh and then all read the new token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use hamcp_domain::config::AuthConfig;
use hamcp_domain::{Error, Result};
use parking_lot::Mutex;

use crate::grant::{
    code_challenge, generate_state, generate_verifier, AuthGrant, GrantRejected, GrantStore,
};
use crate::token::{TokenEndpoint, TokenSet};

type Slot = Arc<tokio::sync::Mutex<Option<TokenSet>>>;

pub struct AuthManager {
    authorize_url: String,
    client_id: String,
    redirect_uri: String,
    refresh_margin: Duration,
    grants: GrantStore,
    endpoint: Arc<dyn TokenEndpoint>,
    slots: Mutex<HashMap<String, Slot>>,
}

impl AuthManager {
    /// `upstream_base` is the controller URL the server itself talks to;
    /// the browser-facing authorize URL may differ (`authorize_base_url`).
    pub fn new(cfg: &AuthConfig, upstream_base: &str, endpoint: Arc<dyn TokenEndpoint>) -> Self {
        let authorize_base = cfg
            .authorize_base_url
            .as_deref()
            .unwrap_or(upstream_base)
            .trim_end_matches('/');
        Self {
            authorize_url: format!("{authorize_base}/auth/authorize"),
            client_id: cfg.effective_client_id(),
            redirect_uri: cfg.redirect_uri(),
            refresh_margin: Duration::from_secs(cfg.refresh_margin_secs),
            grants: GrantStore::new(Duration::from_secs(cfg.grant_ttl_secs)),
            endpoint,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, session_id: &str) -> Slot {
        self.slots
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .clone()
    }

    // ── Handshake ────────────────────────────────────────────────────

    /// Authorization URL for `session_id`. Returns the live grant's URL
    /// when one exists, otherwise issues a new grant.
    pub fn begin(&self, session_id: &str) -> Result<String> {
        let (grant, issued) = self
            .grants
            .live_or_insert_with(session_id, || self.issue(session_id))?;
        if issued {
            tracing::info!(session_id, "authorization grant issued");
        }
        Ok(grant.authorization_url)
    }

    fn issue(&self, session_id: &str) -> Result<AuthGrant> {
        let state = generate_state();
        let verifier = generate_verifier();
        let mut url = reqwest::Url::parse(&self.authorize_url)
            .map_err(|e| Error::Config(format!("invalid authorize URL {}: {e}", self.authorize_url)))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("state", &state)
            .append_pair("response_type", "code")
            .append_pair("code_challenge", &code_challenge(&verifier))
            .append_pair("code_challenge_method", "S256");
        Ok(AuthGrant::new(
            session_id,
            state,
            verifier,
            self.redirect_uri.clone(),
            url.to_string(),
        ))
    }

    pub fn has_pending_grant(&self, session_id: &str) -> bool {
        self.grants.live_for(session_id).is_some()
    }

    /// Redeem a callback's state token. Refused on mismatch, expiry or
    /// replay; the token endpoint is not contacted.
    pub fn redeem(&self, state: &str, code: &str) -> std::result::Result<AuthGrant, GrantRejected> {
        let mut grant = self.grants.take(state).map_err(|e| {
            tracing::warn!(
                error = %e,
                session_id = e.expired_session().unwrap_or("-"),
                "auth callback rejected"
            );
            e
        })?;
        grant.code = Some(code.to_owned());
        Ok(grant)
    }

    /// Exchange a redeemed grant's code and bind the tokens to its session.
    pub async fn exchange(&self, grant: &AuthGrant) -> Result<()> {
        let code = grant
            .code
            .as_deref()
            .ok_or_else(|| Error::AuthHandshakeFailed("grant has no authorization code".into()))?;
        let resp = self
            .endpoint
            .exchange_code(code, grant.verifier(), &grant.redirect_uri)
            .await?;

        let slot = self.slot(&grant.session_id);
        *slot.lock().await = Some(TokenSet::from_response(resp, None));
        tracing::info!(session_id = %grant.session_id, "session authenticated");
        Ok(())
    }

    /// Bind a bearer token presented at connect time. The caller verifies it
    /// against the controller first.
    pub async fn adopt_bearer(&self, session_id: &str, token: &str) {
        let slot = self.slot(session_id);
        *slot.lock().await = Some(TokenSet::bearer(token));
        self.grants.remove(session_id);
    }

    // ── Tokens ───────────────────────────────────────────────────────

    /// Current access token for `session_id`, refreshed first when it
    /// expires within the margin. A failed refresh clears the session's
    /// tokens and yields `AuthRequired`.
    pub async fn ensure_fresh(&self, session_id: &str) -> Result<String> {
        let Some(slot) = self.slots.lock().get(session_id).cloned() else {
            return Err(Error::auth_required("session is not authenticated"));
        };
        let mut guard = slot.lock().await;

        let Some(current) = guard.as_ref() else {
            return Err(Error::auth_required("session is not authenticated"));
        };
        if !current.needs_refresh(self.refresh_margin) {
            return Ok(current.access_token.clone());
        }

        let Some(refresh_token) = current.refresh_token.clone() else {
            *guard = None;
            return Err(Error::auth_required("access token expired"));
        };

        tracing::debug!(session_id, "refreshing access token");
        match self.endpoint.refresh(&refresh_token).await {
            Ok(resp) => {
                let fresh = TokenSet::from_response(resp, Some(refresh_token));
                let access = fresh.access_token.clone();
                *guard = Some(fresh);
                Ok(access)
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "token refresh failed, clearing session tokens");
                *guard = None;
                Err(Error::auth_required("token refresh failed"))
            }
        }
    }

    /// Drop every token and grant held for `session_id`.
    pub fn revoke(&self, session_id: &str) {
        self.grants.remove(session_id);
        if self.slots.lock().remove(session_id).is_some() {
            tracing::debug!(session_id, "session auth state released");
        }
    }

    /// Purge expired grants and return the sessions they belonged to.
    pub fn purge_expired_grants(&self) -> Vec<String> {
        let expired = self.grants.purge_expired();
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired authorization grants purged");
        }
        expired
    }
}
