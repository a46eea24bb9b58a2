mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{start, start_with_events, start_with_tools, state_param, test_config, GOOD_TOKEN};
use hamcp_domain::ErrorKind;
use hamcp_gateway::{bootstrap, shutdown};
use hamcp_protocol::{Frame, RequestId};
use hamcp_sessions::SessionState;
use hamcp_tools::{ObjectSchema, ParamSchema, ToolContext, ToolDescriptor, ToolHandler};
use hamcp_upstream::EventHub;
use serde_json::{json, Value};

fn get_entities() -> Value {
    json!({"operation": "get_entities"})
}

fn states() -> Value {
    json!([
        {"entity_id": "light.kitchen", "state": "on", "attributes": {"friendly_name": "Kitchen"}},
        {"entity_id": "switch.kettle", "state": "off", "attributes": {"friendly_name": "Kettle"}},
    ])
}

/// Extract `(kind, authorization_url)` from an error frame.
fn auth_error(frame: &Frame) -> (ErrorKind, Option<String>) {
    match frame {
        Frame::Error { error, .. } => (
            error.kind,
            error
                .data
                .as_ref()
                .and_then(|d| d["authorization_url"].as_str())
                .map(str::to_owned),
        ),
        other => panic!("expected an error frame, got {other:?}"),
    }
}

fn notification(frame: &Frame) -> (&str, &Value) {
    match frame {
        Frame::Notification { method, params } => (method.as_str(), params),
        other => panic!("expected a notification, got {other:?}"),
    }
}

fn response(frame: Frame) -> (RequestId, Value) {
    match frame {
        Frame::Response { id, result } => (id, result),
        other => panic!("expected a response, got {other:?}"),
    }
}

// ── Handshake ───────────────────────────────────────────────────────

#[tokio::test]
async fn stream_opens_with_endpoint_and_handshake() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    assert!(s.endpoint.starts_with("/messages?session_id="));

    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "handshake");
    assert_eq!(params["session_id"], s.session_id.as_str());
    assert_eq!(params["authenticated"], false);
    assert_eq!(
        h.state.sessions.state(&s.session_id),
        Some(SessionState::Unauthenticated)
    );
}

#[tokio::test]
async fn bearer_token_authenticates_at_connect() {
    let h = start(test_config()).await;

    let mut good = h.connect_with(Some(GOOD_TOKEN)).await;
    let frame = good.next_frame().await;
    assert_eq!(notification(&frame).1["authenticated"], true);
    assert_eq!(
        h.state.sessions.state(&good.session_id),
        Some(SessionState::Authenticated)
    );

    let mut bad = h.connect_with(Some("stolen")).await;
    let frame = bad.next_frame().await;
    assert_eq!(notification(&frame).1["authenticated"], false);
    assert_eq!(
        h.state.sessions.state(&bad.session_id),
        Some(SessionState::Unauthenticated)
    );
}

#[tokio::test]
async fn initialize_and_list_need_no_sign_in() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    s.next_frame().await;

    assert_eq!(s.request(1, "initialize", json!({})).await, 202);
    let (id, result) = response(s.next_frame().await);
    assert_eq!(id, RequestId::Number(1));
    assert_eq!(result["sessionId"], s.session_id.as_str());

    assert_eq!(s.request(2, "tools/list", Value::Null).await, 202);
    let (_, result) = response(s.next_frame().await);
    let names: Vec<&str> = result["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert!(names.contains(&"ha_control"));
    assert!(!names.contains(&"ha_events"));

    assert_eq!(s.request(3, "resources/list", Value::Null).await, 202);
    let frame = s.next_frame().await;
    assert_eq!(auth_error(&frame).0, ErrorKind::MethodNotFound);
}

// ── Sign-in ─────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_requires_sign_in_with_a_unique_state_per_session() {
    let h = start(test_config()).await;
    let mut a = h.connect().await;
    let mut b = h.connect().await;
    a.next_frame().await;
    b.next_frame().await;

    assert_eq!(a.call_tool(1, "ha_control", get_entities()).await, 202);
    assert_eq!(b.call_tool(1, "ha_control", get_entities()).await, 202);

    let (kind_a, url_a) = auth_error(&a.next_frame().await);
    let (kind_b, url_b) = auth_error(&b.next_frame().await);
    assert_eq!(kind_a, ErrorKind::AuthRequired);
    assert_eq!(kind_b, ErrorKind::AuthRequired);
    assert_ne!(state_param(&url_a.unwrap()), state_param(&url_b.unwrap()));

    assert_eq!(
        h.state.sessions.state(&a.session_id),
        Some(SessionState::Authenticating)
    );
    assert_eq!(h.upstream.calls("/api/states"), 0);
}

#[tokio::test]
async fn repeated_calls_reuse_the_pending_grant() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    s.next_frame().await;

    s.call_tool(1, "ha_control", get_entities()).await;
    let (_, first) = auth_error(&s.next_frame().await);
    s.call_tool(2, "ha_control", get_entities()).await;
    let (_, second) = auth_error(&s.next_frame().await);
    assert_eq!(first, second);
}

#[tokio::test]
async fn callback_completes_sign_in_and_reads_are_cached() {
    let h = start(test_config()).await;
    h.upstream.route("/api/states", states());
    let mut s = h.connect().await;
    s.next_frame().await;

    s.call_tool(1, "ha_control", get_entities()).await;
    let (_, url) = auth_error(&s.next_frame().await);
    let state = state_param(&url.unwrap());

    let resp = h
        .get(&format!("/auth/callback?code=abc&state={state}"))
        .await;
    assert_eq!(resp.status(), 200);
    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "auth/completed");
    assert_eq!(params["session_id"], s.session_id.as_str());
    assert_eq!(h.endpoint.exchanges(), 1);

    s.call_tool(2, "ha_control", get_entities()).await;
    let (id, first) = response(s.next_frame().await);
    assert_eq!(id, RequestId::Number(2));
    assert_eq!(first["structuredContent"]["count"], 2);

    s.call_tool(3, "ha_control", get_entities()).await;
    let (_, second) = response(s.next_frame().await);
    assert_eq!(first["structuredContent"], second["structuredContent"]);
    assert_eq!(h.upstream.calls("/api/states"), 1);

    // The grant was consumed.
    let replay = h
        .get(&format!("/auth/callback?code=abc&state={state}"))
        .await;
    assert_eq!(replay.status(), 401);
    assert_eq!(h.endpoint.exchanges(), 1);
}

#[tokio::test]
async fn mismatched_state_is_refused_without_exchange() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    s.next_frame().await;
    s.call_tool(1, "ha_control", get_entities()).await;
    s.next_frame().await;

    let resp = h.get("/auth/callback?code=abc&state=forged").await;
    assert_eq!(resp.status(), 401);
    assert_eq!(h.endpoint.exchanges(), 0);
    assert_eq!(
        h.state.sessions.state(&s.session_id),
        Some(SessionState::Authenticating)
    );

    let resp = h.get("/auth/callback?state=forged").await;
    assert_eq!(resp.status(), 400);
    let resp = h.get("/auth/callback?error=access_denied").await;
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn expired_callback_returns_session_to_unauthenticated() {
    let mut config = test_config();
    config.auth.grant_ttl_secs = 1;
    let h = start(config).await;
    let mut s = h.connect().await;
    let mut other = h.connect().await;
    s.next_frame().await;
    other.next_frame().await;

    s.call_tool(1, "ha_control", get_entities()).await;
    let (_, url) = auth_error(&s.next_frame().await);
    other.call_tool(1, "ha_control", get_entities()).await;
    other.next_frame().await;
    let state = state_param(&url.unwrap());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let resp = h
        .get(&format!("/auth/callback?code=abc&state={state}"))
        .await;
    assert_eq!(resp.status(), 401);
    assert_eq!(h.endpoint.exchanges(), 0);
    assert_eq!(
        h.state.sessions.state(&s.session_id),
        Some(SessionState::Unauthenticated)
    );
    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "auth/failed");
    assert!(params["reason"].as_str().unwrap().contains("expired"));

    // Only the session that owned the grant is reset.
    assert_eq!(
        h.state.sessions.state(&other.session_id),
        Some(SessionState::Authenticating)
    );

    // A fresh call starts a new handshake with a new state.
    s.call_tool(2, "ha_control", get_entities()).await;
    let (kind, url) = auth_error(&s.next_frame().await);
    assert_eq!(kind, ErrorKind::AuthRequired);
    assert_ne!(state_param(&url.unwrap()), state);
}

#[tokio::test]
async fn logout_closes_the_stream() {
    let h = start(test_config()).await;
    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    assert_eq!(s.request(9, "auth/logout", Value::Null).await, 202);
    let (id, result) = response(s.next_frame().await);
    assert_eq!(id, RequestId::Number(9));
    assert_eq!(result["logged_out"], true);

    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "session/cancelled");
    assert_eq!(params["reason"], "logout");
    assert!(s.ended().await);
}

#[tokio::test]
async fn closing_a_stream_releases_its_event_subscriptions() {
    let hub = EventHub::new(16);
    let h = start_with_events(test_config(), hub.clone()).await;
    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    let sub = json!({"operation": "subscribe", "event_type": "automation_triggered"});
    assert_eq!(s.call_tool(1, "ha_events", sub).await, 202);
    let (_, result) = response(s.next_frame().await);
    assert_eq!(result["structuredContent"]["subscribed"], true);
    assert!(hub.registry().contains("automation_triggered"));

    s.request(2, "auth/logout", Value::Null).await;
    response(s.next_frame().await);
    s.next_frame().await;
    assert!(s.ended().await);

    let released = async {
        while hub.registry().contains("automation_triggered") {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(2), released)
        .await
        .expect("subscription outlived its session");
}

// ── Ordering & admission ────────────────────────────────────────────

#[tokio::test]
async fn responses_follow_request_order() {
    let h = start(test_config()).await;
    h.upstream.route("/api/states/light.slow", json!({"entity_id": "light.slow", "state": "on"}));
    h.upstream.route("/api/states/light.fast", json!({"entity_id": "light.fast", "state": "off"}));
    h.upstream.delay("/api/states/light.slow", Duration::from_millis(300));

    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    s.call_tool(1, "ha_control", json!({"operation": "get_entity", "entity_id": "light.slow"}))
        .await;
    s.call_tool(2, "ha_control", json!({"operation": "get_entity", "entity_id": "light.fast"}))
        .await;

    let (first, _) = response(s.next_frame().await);
    let (second, _) = response(s.next_frame().await);
    assert_eq!(first, RequestId::Number(1));
    assert_eq!(second, RequestId::Number(2));
}

struct Broken;

#[async_trait]
impl ToolHandler for Broken {
    async fn call(&self, _ctx: &ToolContext, args: Value) -> hamcp_domain::Result<Value> {
        let items: Vec<Value> = serde_json::from_value(args["items"].clone()).unwrap_or_default();
        Ok(items[0].clone())
    }
}

#[tokio::test]
async fn panicking_tool_still_replies_and_releases_its_slot() {
    let h = start_with_tools(test_config(), |registry| {
        registry
            .register(ToolDescriptor::new(
                "broken",
                "indexes into an empty list",
                ParamSchema::Object(ObjectSchema::new(Vec::new())),
                Arc::new(Broken),
            ))
            .unwrap();
    })
    .await;
    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    assert_eq!(s.call_tool(1, "broken", json!({})).await, 202);
    assert_eq!(s.request(2, "ping", Value::Null).await, 202);

    match s.next_frame().await {
        Frame::Error { id, error } => {
            assert_eq!(id, Some(RequestId::Number(1)));
            assert_eq!(error.kind, ErrorKind::Internal);
            assert_eq!(error.message, "internal error");
        }
        other => panic!("expected an error frame, got {other:?}"),
    }
    let (id, _) = response(s.next_frame().await);
    assert_eq!(id, RequestId::Number(2));
    assert_eq!(h.state.sessions.in_flight(&s.session_id), 0);
}

#[tokio::test]
async fn duplicate_request_id_is_refused() {
    let h = start(test_config()).await;
    h.upstream.route("/api/states/light.slow", json!({"entity_id": "light.slow"}));
    h.upstream.delay("/api/states/light.slow", Duration::from_millis(300));

    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    let args = json!({"operation": "get_entity", "entity_id": "light.slow"});
    assert_eq!(s.call_tool(1, "ha_control", args.clone()).await, 202);
    assert_eq!(s.call_tool(1, "ha_control", args).await, 409);

    let (id, _) = response(s.next_frame().await);
    assert_eq!(id, RequestId::Number(1));
}

#[tokio::test]
async fn invalid_arguments_name_the_field() {
    let h = start(test_config()).await;
    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    s.call_tool(4, "ha_control", json!({"operation": "get_entity", "entity_id": "Not An Id"}))
        .await;
    match s.next_frame().await {
        Frame::Error { id, error } => {
            assert_eq!(id, Some(RequestId::Number(4)));
            assert_eq!(error.kind, ErrorKind::ValidationError);
            assert_eq!(error.field.as_deref(), Some("entity_id"));
        }
        other => panic!("expected an error frame, got {other:?}"),
    }
    assert_eq!(h.upstream.calls("/api/states/Not An Id"), 0);
}

#[tokio::test]
async fn bad_posts_are_refused() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    s.next_frame().await;

    let unknown = h
        .http
        .post(format!("{}/messages?session_id=nope", h.base))
        .body(Frame::request(1, "ping", Value::Null).encode().unwrap())
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);

    assert_eq!(s.post_raw("{not json").await.status(), 400);
    let reply = Frame::response(RequestId::Number(1), json!({})).encode().unwrap();
    assert_eq!(s.post_raw(reply).await.status(), 400);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_connections() {
    let h = start(test_config()).await;
    let mut s = h.connect().await;
    s.next_frame().await;

    let body: Value = h.get("/health").await.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["connections"], 1);
}

#[tokio::test]
async fn connection_cap_is_enforced() {
    let mut config = test_config();
    config.server.max_connections = 1;
    let h = start(config).await;
    let mut s = h.connect().await;
    s.next_frame().await;

    let refused = h.get("/sse").await;
    assert_eq!(refused.status(), 503);
}

#[tokio::test]
async fn idle_session_is_closed() {
    let mut config = test_config();
    config.sessions.idle_timeout_secs = 1;
    config.sessions.reap_interval_secs = 1;
    let h = start(config).await;
    let tasks = bootstrap::spawn_background_tasks(&h.state).unwrap();

    let mut s = h.connect().await;
    s.next_frame().await;

    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "session/cancelled");
    assert_eq!(params["reason"], "idle_timeout");
    assert!(s.ended().await);

    for _ in 0..20 {
        if h.state.sessions.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(h.state.sessions.is_empty());

    h.state.shutdown.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn shutdown_drains_streams() {
    let h = start(test_config()).await;
    let mut s = h.connect_with(Some(GOOD_TOKEN)).await;
    s.next_frame().await;

    shutdown::drain(&h.state).await;
    assert!(h.state.shutdown.is_cancelled());

    let frame = s.next_frame().await;
    let (method, params) = notification(&frame);
    assert_eq!(method, "session/cancelled");
    assert_eq!(params["reason"], "shutdown");
    assert!(s.ended().await);

    let refused = h.get("/sse").await;
    assert_eq!(refused.status(), 503);
}
