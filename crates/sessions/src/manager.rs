//! [`SessionManager`]: the session table.
//!
//! All mutation happens under one `parking_lot::RwLock`; no operation holds
//! it across an `.await`. Outbound frames are enqueued with `try_send`, so a
//! slow reader can never stall the request side: a full queue closes the
//! session with [`CloseReason::Backpressure`] instead.

use std::collections::HashMap;
use std::time::Duration;

use hamcp_domain::config::SessionsConfig;
use hamcp_domain::{Error, Result};
use hamcp_protocol::{Frame, RequestId};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::session::{InFlight, Session, SessionInfo};
use crate::state::{CloseReason, SessionState};

/// What the stream side receives for a new session.
pub struct SessionHandle {
    pub id: String,
    /// Cancelled when the session starts closing.
    pub cancel: CancellationToken,
    pub outbound: mpsc::Receiver<Frame>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestRejected {
    #[error("unknown session")]
    UnknownSession,
    #[error("request id {0} was already used in this session")]
    Duplicate(RequestId),
    #[error("session is closing")]
    NotOpen,
}

impl From<RequestRejected> for Error {
    fn from(e: RequestRejected) -> Self {
        match e {
            RequestRejected::UnknownSession => Error::validation("session_id", e.to_string()),
            RequestRejected::Duplicate(_) => Error::validation("id", e.to_string()),
            RequestRejected::NotOpen => Error::Unavailable(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("unknown session")]
    UnknownSession,
    #[error("session stream is gone")]
    Closed,
    #[error("outbound queue full")]
    Full,
}

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    max_sessions: usize,
    outbound_capacity: usize,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize, outbound_capacity: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            outbound_capacity: outbound_capacity.max(1),
            idle_timeout,
        }
    }

    pub fn from_config(cfg: &SessionsConfig, max_sessions: usize) -> Self {
        Self::new(
            max_sessions,
            cfg.outbound_queue,
            Duration::from_secs(cfg.idle_timeout_secs),
        )
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register a new session in `Connecting`. Fails with `Unavailable`
    /// when the connection cap is reached.
    pub fn create(&self) -> Result<SessionHandle> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(Error::Unavailable(format!(
                "connection limit reached ({})",
                self.max_sessions
            )));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);
        let session = Session::new(id.clone(), tx);
        let cancel = session.cancel.clone();
        sessions.insert(id.clone(), session);
        tracing::info!(session_id = %id, live = sessions.len(), "session created");

        Ok(SessionHandle {
            id,
            cancel,
            outbound: rx,
        })
    }

    /// Move `id` to `to`. Returns the previous state.
    pub fn transition(&self, id: &str, to: SessionState) -> Result<SessionState> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or(RequestRejected::UnknownSession)?;
        Ok(session.transition(to)?)
    }

    pub fn state(&self, id: &str) -> Option<SessionState> {
        self.sessions.read().get(id).map(Session::state)
    }

    pub fn touch(&self, id: &str) {
        if let Some(s) = self.sessions.write().get_mut(id) {
            s.touch();
        }
    }

    /// Start closing `id`: record the reason and cancel the session token,
    /// which cancels every in-flight invocation. Returns `false` when the
    /// session was unknown or already closing.
    pub fn close(&self, id: &str, reason: CloseReason) -> bool {
        let mut sessions = self.sessions.write();
        let Some(session) = sessions.get_mut(id) else {
            return false;
        };
        if session.transition(SessionState::Closing).is_err() {
            return false;
        }
        session.close_reason = Some(reason);
        session.cancel.cancel();
        tracing::info!(
            session_id = %id,
            reason = %reason,
            in_flight = session.in_flight.len(),
            "session closing"
        );
        true
    }

    /// Finish a session: close it if still open, mark it `Closed`, and drop
    /// it from the table.
    pub fn remove(&self, id: &str) -> Option<SessionInfo> {
        self.close(id, CloseReason::Disconnected);
        let mut sessions = self.sessions.write();
        let mut session = sessions.remove(id)?;
        let _ = session.transition(SessionState::Closed);
        let info = session.info();
        tracing::info!(
            session_id = %id,
            reason = ?info.close_reason,
            live = sessions.len(),
            "session closed"
        );
        Some(info)
    }

    /// Close every open session with `reason`. Returns how many were closed.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.iter().filter(|id| self.close(id, reason)).count()
    }

    /// Close sessions idle for at least the idle timeout.
    pub fn reap_idle(&self) -> Vec<String> {
        let idle: Vec<String> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.state.is_open() && s.last_activity.elapsed() >= self.idle_timeout)
            .map(|s| s.id.clone())
            .collect();
        idle.into_iter()
            .filter(|id| self.close(id, CloseReason::IdleTimeout))
            .collect()
    }

    // ── Requests ─────────────────────────────────────────────────────

    /// Admit request `rid`. Returns the invocation's cancellation token, a
    /// child of the session token. `ordered` reserves the request's place in
    /// the response order.
    pub fn begin_request(
        &self,
        id: &str,
        rid: &RequestId,
        ordered: bool,
    ) -> std::result::Result<CancellationToken, RequestRejected> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or(RequestRejected::UnknownSession)?;
        if !session.state.is_open() {
            return Err(RequestRejected::NotOpen);
        }
        if !session.seen.insert(rid.clone()) {
            return Err(RequestRejected::Duplicate(rid.clone()));
        }

        let cancel = session.cancel.child_token();
        session.in_flight.insert(
            rid.clone(),
            InFlight {
                issued_at: tokio::time::Instant::now(),
                cancel: cancel.clone(),
            },
        );
        if ordered {
            session.sequencer.reserve(rid.clone());
        }
        session.touch();
        Ok(cancel)
    }

    /// Cancel one in-flight request. Returns whether it was found.
    pub fn cancel_request(&self, id: &str, rid: &RequestId) -> bool {
        let sessions = self.sessions.read();
        match sessions.get(id).and_then(|s| s.in_flight.get(rid)) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Deliver the reply to `rid` and release it from the in-flight set.
    /// The frame is held back until every earlier ordered reply is out.
    pub fn complete(&self, id: &str, rid: &RequestId, frame: Frame) -> std::result::Result<(), PushError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or(PushError::UnknownSession)?;
        if let Some(entry) = session.in_flight.remove(rid) {
            tracing::debug!(
                session_id = %id,
                request_id = %rid,
                duration_ms = entry.issued_at.elapsed().as_millis() as u64,
                "request complete"
            );
        }
        let ready = session.sequencer.complete(rid, frame);
        for frame in ready {
            enqueue(session, frame)?;
        }
        Ok(())
    }

    /// Enqueue a frame outside the request order (notifications).
    pub fn notify(&self, id: &str, frame: Frame) -> std::result::Result<(), PushError> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or(PushError::UnknownSession)?;
        enqueue(session, frame)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn in_flight(&self, id: &str) -> usize {
        self.sessions.read().get(id).map_or(0, |s| s.in_flight.len())
    }

    pub fn total_in_flight(&self) -> usize {
        self.sessions.read().values().map(|s| s.in_flight.len()).sum()
    }

    pub fn close_reason(&self, id: &str) -> Option<CloseReason> {
        self.sessions.read().get(id).and_then(|s| s.close_reason)
    }

    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(id).map(Session::info)
    }

    pub fn list(&self) -> Vec<SessionInfo> {
        self.sessions.read().values().map(Session::info).collect()
    }

    /// Sessions in the table, including ones still closing.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `try_send` one frame. A full queue closes the session.
fn enqueue(session: &mut Session, frame: Frame) -> std::result::Result<(), PushError> {
    if session.state == SessionState::Closed {
        return Err(PushError::Closed);
    }
    match session.outbound.try_send(frame) {
        Ok(()) => Ok(()),
        Err(TrySendError::Closed(_)) => Err(PushError::Closed),
        Err(TrySendError::Full(_)) => {
            if session.transition(SessionState::Closing).is_ok() {
                session.close_reason = Some(CloseReason::Backpressure);
                session.cancel.cancel();
                tracing::warn!(session_id = %session.id, "outbound queue full, closing session");
            }
            Err(PushError::Full)
        }
    }
}
