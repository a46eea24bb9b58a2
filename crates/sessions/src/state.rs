//! Session lifecycle states and the transitions allowed between them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Unauthenticated,
    Authenticating,
    Authenticated,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Unauthenticated => "unauthenticated",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    /// Whether `self → to` is a legal step.
    ///
    /// `Connecting → Authenticated` covers a bearer token verified while
    /// the stream is being opened.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        match (self, to) {
            (Connecting, Unauthenticated) | (Connecting, Authenticated) => true,
            (Unauthenticated, Authenticating) => true,
            (Authenticating, Authenticated) | (Authenticating, Unauthenticated) => true,
            (Authenticated, Unauthenticated) => true,
            (Closing, Closed) => true,
            (from, Closing) => from.is_open(),
            _ => false,
        }
    }

    /// Not yet `Closing` or `Closed`.
    pub fn is_open(self) -> bool {
        !matches!(self, Self::Closing | Self::Closed)
    }

    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left the open states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Disconnected,
    Logout,
    IdleTimeout,
    Backpressure,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Logout => "logout",
            Self::IdleTimeout => "idle_timeout",
            Self::Backpressure => "backpressure",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether frames already queued should still reach the client before
    /// the stream ends.
    pub fn drains_queue(self) -> bool {
        matches!(self, Self::Logout | Self::Shutdown | Self::IdleTimeout)
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

impl From<TransitionError> for hamcp_domain::Error {
    fn from(e: TransitionError) -> Self {
        hamcp_domain::Error::Other(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    const ALL: [SessionState; 6] = [
        Connecting,
        Unauthenticated,
        Authenticating,
        Authenticated,
        Closing,
        Closed,
    ];

    #[test]
    fn legal_transitions() {
        assert!(Connecting.can_transition_to(Unauthenticated));
        assert!(Unauthenticated.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Authenticated));
        assert!(Authenticating.can_transition_to(Unauthenticated));
        assert!(Authenticated.can_transition_to(Unauthenticated));
        assert!(Closing.can_transition_to(Closed));
    }

    #[test]
    fn every_open_state_can_close() {
        for s in ALL.into_iter().filter(|s| s.is_open()) {
            assert!(s.can_transition_to(Closing), "{s} -> closing");
            assert!(!s.can_transition_to(Closed), "{s} -> closed skips closing");
        }
        assert!(!Closing.can_transition_to(Closing));
        assert!(!Closed.can_transition_to(Closing));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        assert!(!Unauthenticated.can_transition_to(Authenticated));
        assert!(!Authenticated.can_transition_to(Authenticating));
        assert!(!Closed.can_transition_to(Unauthenticated));
        assert!(!Closing.can_transition_to(Authenticated));
        for s in ALL {
            assert!(!s.can_transition_to(Connecting));
            assert!(!s.can_transition_to(s), "{s} -> {s}");
        }
    }

    #[test]
    fn wire_names_are_snake_case() {
        assert_eq!(serde_json::to_value(CloseReason::IdleTimeout).unwrap(), "idle_timeout");
        assert_eq!(serde_json::to_value(Authenticating).unwrap(), "authenticating");
    }
}
