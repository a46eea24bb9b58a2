//! Pending authorization grants.
//!
//! A grant lives from the moment a session is sent to the authorization
//! page until its callback arrives (or the TTL passes). The state token is
//! the only key a callback can present; it is compared in constant time and
//! matches at most once.

use std::collections::HashMap;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hamcp_domain::Error;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::time::Instant;

const STATE_BYTES: usize = 32;
const VERIFIER_LEN: usize = 64;

/// URL-safe encoding of 32 random bytes.
pub fn generate_state() -> String {
    let mut buf = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

pub fn generate_verifier() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFIER_LEN)
        .map(char::from)
        .collect()
}

/// S256 code challenge: `BASE64URL(SHA256(verifier))` without padding.
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// One pending handshake. `Debug` omits the verifier.
#[derive(Clone)]
pub struct AuthGrant {
    pub session_id: String,
    pub state: String,
    pub redirect_uri: String,
    pub authorization_url: String,
    pub created_at: Instant,
    /// Filled once the callback presents it.
    pub code: Option<String>,
    verifier: String,
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("session_id", &self.session_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .field("state", &"[REDACTED]")
            .field("verifier", &"[REDACTED]")
            .finish()
    }
}

impl AuthGrant {
    pub fn new(
        session_id: impl Into<String>,
        state: String,
        verifier: String,
        redirect_uri: impl Into<String>,
        authorization_url: String,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state,
            redirect_uri: redirect_uri.into(),
            authorization_url,
            created_at: Instant::now(),
            code: None,
            verifier,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) >= ttl
    }

    fn state_matches(&self, presented: &str) -> bool {
        self.state.as_bytes().ct_eq(presented.as_bytes()).into()
    }
}

/// Why a presented state token was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrantRejected {
    #[error("unknown or already used state")]
    Unknown,
    /// The state matched a grant past its TTL. The grant is gone, so the
    /// owning session is handed back for the caller to reset.
    #[error("authorization grant expired")]
    Expired { session_id: String },
}

impl GrantRejected {
    pub fn expired_session(&self) -> Option<&str> {
        match self {
            Self::Expired { session_id } => Some(session_id),
            Self::Unknown => None,
        }
    }
}

impl From<GrantRejected> for Error {
    fn from(e: GrantRejected) -> Self {
        Error::AuthHandshakeFailed(e.to_string())
    }
}

/// At most one live grant per session.
pub struct GrantStore {
    ttl: Duration,
    grants: Mutex<HashMap<String, AuthGrant>>,
}

impl GrantStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            grants: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store `grant`, replacing any grant the session already had.
    pub fn insert(&self, grant: AuthGrant) {
        self.grants.lock().insert(grant.session_id.clone(), grant);
    }

    /// The session's grant, if it has one that has not expired.
    pub fn live_for(&self, session_id: &str) -> Option<AuthGrant> {
        let now = Instant::now();
        self.grants
            .lock()
            .get(session_id)
            .filter(|g| !g.is_expired(self.ttl, now))
            .cloned()
    }

    /// The session's live grant, or a new one from `issue` when it has none.
    /// The flag is true when `issue` ran.
    pub fn live_or_insert_with(
        &self,
        session_id: &str,
        issue: impl FnOnce() -> hamcp_domain::Result<AuthGrant>,
    ) -> hamcp_domain::Result<(AuthGrant, bool)> {
        let now = Instant::now();
        let mut grants = self.grants.lock();
        if let Some(grant) = grants
            .get(session_id)
            .filter(|g| !g.is_expired(self.ttl, now))
        {
            return Ok((grant.clone(), false));
        }
        let grant = issue()?;
        grants.insert(session_id.to_owned(), grant.clone());
        Ok((grant, true))
    }

    /// Redeem the grant whose state token equals `state`. The grant is
    /// removed whether or not it is still valid, so a state token can never
    /// be presented twice.
    pub fn take(&self, state: &str) -> Result<AuthGrant, GrantRejected> {
        let now = Instant::now();
        let mut grants = self.grants.lock();

        // Every stored grant is compared so timing does not depend on where
        // the match sits.
        let mut matched = None;
        for (session_id, grant) in grants.iter() {
            if grant.state_matches(state) {
                matched = Some(session_id.clone());
            }
        }

        let grant = matched
            .and_then(|session_id| grants.remove(&session_id))
            .ok_or(GrantRejected::Unknown)?;

        if grant.is_expired(self.ttl, now) {
            return Err(GrantRejected::Expired {
                session_id: grant.session_id,
            });
        }
        Ok(grant)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.grants.lock().remove(session_id).is_some()
    }

    /// Drop expired grants and return the sessions they belonged to.
    pub fn purge_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.grants.lock().retain(|session_id, grant| {
            let keep = !grant.is_expired(self.ttl, now);
            if !keep {
                expired.push(session_id.clone());
            }
            keep
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.grants.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
