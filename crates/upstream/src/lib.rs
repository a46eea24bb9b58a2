//! Access layer for the automation controller.
//!
//! - [`transport`] — the HTTP seam ([`Transport`] trait, reqwest implementation)
//! - [`retry`] — jittered exponential backoff for transient failures
//! - [`cache`] — short-lived GET response cache with resource invalidation
//! - [`client`] — [`UpstreamClient`], which combines the three
//! - [`events`] — the shared WebSocket event stream and its durable
//!   subscription registry

pub mod cache;
pub mod client;
pub mod events;
pub mod request;
pub mod retry;
pub mod transport;

pub use cache::{Fingerprint, ResponseCache};
pub use client::{CallContext, UpstreamClient};
pub use events::{EventHub, EventStream, SubscriptionRegistry, UpstreamEvent};
pub use request::{UpstreamRequest, UpstreamResponse};
pub use retry::RetryPolicy;
pub use transport::{ReqwestTransport, Transport, TransportFailure};
