use std::time::Duration;

use hamcp_protocol::{Frame, RequestId};
use hamcp_sessions::{CloseReason, PushError, SessionManager, SessionState};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_reaped() {
    let m = SessionManager::new(10, 8, Duration::from_secs(1800));
    let idle = m.create().unwrap();
    let busy = m.create().unwrap();
    m.transition(&idle.id, SessionState::Unauthenticated).unwrap();
    m.transition(&busy.id, SessionState::Unauthenticated).unwrap();

    tokio::time::advance(Duration::from_secs(1000)).await;
    m.touch(&busy.id);
    assert!(m.reap_idle().is_empty());

    tokio::time::advance(Duration::from_secs(800)).await;
    assert_eq!(m.reap_idle(), vec![idle.id.clone()]);
    assert!(idle.cancel.is_cancelled());
    assert!(!busy.cancel.is_cancelled());
    assert_eq!(m.state(&idle.id), Some(SessionState::Closing));
    assert_eq!(m.close_reason(&idle.id), Some(CloseReason::IdleTimeout));

    // Reaping again does not close twice.
    assert!(m.reap_idle().is_empty());

    let info = m.remove(&idle.id).unwrap();
    assert_eq!(info.state, SessionState::Closed);
    assert_eq!(info.close_reason, Some(CloseReason::IdleTimeout));
}

#[tokio::test]
async fn full_queue_closes_with_backpressure() {
    let m = SessionManager::new(10, 2, Duration::from_secs(1800));
    let h = m.create().unwrap();

    let note = || Frame::notification("tools/progress", json!({}));
    m.notify(&h.id, note()).unwrap();
    m.notify(&h.id, note()).unwrap();
    assert_eq!(m.notify(&h.id, note()), Err(PushError::Full));

    assert!(h.cancel.is_cancelled());
    assert_eq!(m.close_reason(&h.id), Some(CloseReason::Backpressure));
    assert_eq!(m.state(&h.id), Some(SessionState::Closing));
}

#[tokio::test]
async fn dropped_receiver_reports_closed() {
    let m = SessionManager::new(10, 2, Duration::from_secs(1800));
    let h = m.create().unwrap();
    let id = h.id.clone();
    drop(h);

    let rid = RequestId::Number(1);
    m.begin_request(&id, &rid, true).unwrap();
    assert_eq!(
        m.complete(&id, &rid, Frame::response(rid.clone(), json!({}))),
        Err(PushError::Closed)
    );
}

#[tokio::test]
async fn shutdown_closes_every_open_session() {
    let m = SessionManager::new(10, 2, Duration::from_secs(1800));
    let a = m.create().unwrap();
    let b = m.create().unwrap();
    m.close(&a.id, CloseReason::Logout);

    assert_eq!(m.close_all(CloseReason::Shutdown), 1);
    assert_eq!(m.close_reason(&a.id), Some(CloseReason::Logout));
    assert_eq!(m.close_reason(&b.id), Some(CloseReason::Shutdown));
    assert_eq!(m.len(), 2);
}
