//! The `hamcp` server: HTTP surface, stream transport and dispatch.
//!
//! - [`transport`] — `GET /sse` push stream and `POST /messages`
//! - [`engine`] — request dispatch, auth gate, worker pool
//! - [`api`] — router, `/auth/callback`, `/health`
//! - [`bootstrap`] — wiring [`state::AppState`] from config, background tasks
//! - [`shutdown`] — drain and close on SIGINT/SIGTERM

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod engine;
pub mod reaper;
pub mod shutdown;
pub mod state;
pub mod transport;
