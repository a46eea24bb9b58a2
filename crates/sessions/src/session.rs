use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use hamcp_protocol::{Frame, RequestId, Sequencer};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::state::{CloseReason, SessionState, TransitionError};

pub(crate) struct InFlight {
    pub(crate) issued_at: Instant,
    pub(crate) cancel: CancellationToken,
}

/// Server-side state of one stream connection.
pub struct Session {
    pub(crate) id: String,
    pub(crate) state: SessionState,
    pub(crate) connected_at: DateTime<Utc>,
    pub(crate) last_activity: Instant,
    pub(crate) in_flight: HashMap<RequestId, InFlight>,
    /// Every request id this session has used; ids are never reused.
    pub(crate) seen: HashSet<RequestId>,
    pub(crate) close_reason: Option<CloseReason>,
    /// Parent of every in-flight invocation's token.
    pub(crate) cancel: CancellationToken,
    pub(crate) outbound: mpsc::Sender<Frame>,
    pub(crate) sequencer: Sequencer,
}

impl Session {
    pub(crate) fn new(id: String, outbound: mpsc::Sender<Frame>) -> Self {
        Self {
            id,
            state: SessionState::Connecting,
            connected_at: Utc::now(),
            last_activity: Instant::now(),
            in_flight: HashMap::new(),
            seen: HashSet::new(),
            close_reason: None,
            cancel: CancellationToken::new(),
            outbound,
            sequencer: Sequencer::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn transition(&mut self, to: SessionState) -> Result<SessionState, TransitionError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to });
        }
        self.state = to;
        tracing::debug!(session_id = %self.id, %from, %to, "session transition");
        Ok(from)
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            state: self.state,
            connected_at: self.connected_at,
            idle_secs: self.last_activity.elapsed().as_secs(),
            in_flight: self.in_flight.len(),
            close_reason: self.close_reason,
        }
    }
}

/// Point-in-time summary of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
}
