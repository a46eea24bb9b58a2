//! Authorization-code + PKCE handshake against the controller's identity
//! provider, and the per-session token store it feeds.
//!
//! - [`grant`] — pending grants (state token, PKCE verifier), single use
//! - [`token`] — token sets, the token-endpoint seam and its HTTP client
//! - [`manager`] — [`AuthManager`], which ties both to session ids

pub mod grant;
pub mod manager;
pub mod token;

pub use grant::{AuthGrant, GrantRejected, GrantStore};
pub use manager::AuthManager;
pub use token::{HttpTokenEndpoint, TokenEndpoint, TokenResponse, TokenSet};
