//! Wire protocol spoken over the stream transport.
//!
//! - [`frame`] — the four message kinds and their JSON encoding
//! - [`messages`] — method names and typed payloads
//! - [`sequencer`] — per-session in-order response release
//! - [`sse`] — client-side SSE event splitting

pub mod frame;
pub mod messages;
pub mod sequencer;
pub mod sse;

pub use frame::{ErrorBody, Frame, FrameError, MessageKind, RequestId};
pub use sequencer::Sequencer;
