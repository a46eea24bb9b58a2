//! Session management for hamcp.
//!
//! One session per stream connection. The [`SessionManager`] owns every
//! session: its lifecycle state, the requests it has in flight, and the
//! bounded outbound queue the stream writer drains.

pub mod manager;
pub mod session;
pub mod state;

pub use manager::{PushError, RequestRejected, SessionHandle, SessionManager};
pub use session::{Session, SessionInfo};
pub use state::{CloseReason, SessionState, TransitionError};
