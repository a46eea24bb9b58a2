//! In-process harness: the real router on an ephemeral port, backed by a
//! scripted controller and token endpoint.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use hamcp_auth::{TokenEndpoint, TokenResponse};
use hamcp_domain::config::Config;
use hamcp_gateway::state::AppState;
use hamcp_gateway::{api, bootstrap};
use hamcp_protocol::sse::{drain_events, SseEvent};
use hamcp_protocol::Frame;
use hamcp_tools::{register_builtin, ToolRegistry};
use hamcp_upstream::{
    EventHub, Transport, TransportFailure, UpstreamRequest, UpstreamResponse,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

pub const GOOD_TOKEN: &str = "good-token";
const READ_TIMEOUT: Duration = Duration::from_secs(5);

// ── Scripted controller ─────────────────────────────────────────────

#[derive(Default)]
pub struct MockUpstream {
    routes: Mutex<HashMap<String, Value>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl MockUpstream {
    pub fn route(&self, path: &str, body: Value) {
        self.routes.lock().insert(path.to_owned(), body);
    }

    pub fn delay(&self, path: &str, delay: Duration) {
        self.delays.lock().insert(path.to_owned(), delay);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.calls.lock().get(path).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockUpstream {
    async fn send(
        &self,
        request: &UpstreamRequest,
        token: &str,
    ) -> Result<UpstreamResponse, TransportFailure> {
        *self.calls.lock().entry(request.path.clone()).or_default() += 1;
        let delay = self.delays.lock().get(&request.path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if token != GOOD_TOKEN {
            return Ok(UpstreamResponse::new(401, json!({"message": "unauthorized"})));
        }
        if request.path == "/api/" {
            return Ok(UpstreamResponse::new(200, json!({"message": "API running."})));
        }
        let body = self.routes.lock().get(&request.path).cloned();
        Ok(match body {
            Some(body) => UpstreamResponse::new(200, body),
            None => UpstreamResponse::new(404, json!({"message": "not found"})),
        })
    }
}

// ── Scripted token endpoint ─────────────────────────────────────────

#[derive(Default)]
pub struct MockTokenEndpoint {
    exchanges: AtomicUsize,
}

impl MockTokenEndpoint {
    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

fn issued() -> TokenResponse {
    TokenResponse {
        access_token: GOOD_TOKEN.into(),
        refresh_token: Some("refresh-1".into()),
        expires_in: Some(1800),
        token_type: Some("Bearer".into()),
    }
}

#[async_trait]
impl TokenEndpoint for MockTokenEndpoint {
    async fn exchange_code(
        &self,
        _code: &str,
        _verifier: &str,
        _redirect_uri: &str,
    ) -> hamcp_domain::Result<TokenResponse> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        Ok(issued())
    }

    async fn refresh(&self, _refresh_token: &str) -> hamcp_domain::Result<TokenResponse> {
        Ok(issued())
    }
}

// ── Server ──────────────────────────────────────────────────────────

pub struct Harness {
    pub base: String,
    pub state: AppState,
    pub upstream: Arc<MockUpstream>,
    pub endpoint: Arc<MockTokenEndpoint>,
    pub http: reqwest::Client,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.upstream.retry.max_retries = 0;
    config.upstream.events.enabled = false;
    config
}

pub async fn start(config: Config) -> Harness {
    let upstream = Arc::new(MockUpstream::default());
    let endpoint = Arc::new(MockTokenEndpoint::default());
    let state = bootstrap::assemble(
        Arc::new(config),
        upstream.clone(),
        endpoint.clone(),
        None,
    )
    .unwrap();
    serve(state, upstream, endpoint).await
}

/// Like [`start`], with `hub` wired in. Nothing connects it upstream; tests
/// publish into it directly.
pub async fn start_with_events(config: Config, hub: Arc<EventHub>) -> Harness {
    let upstream = Arc::new(MockUpstream::default());
    let endpoint = Arc::new(MockTokenEndpoint::default());
    let state = bootstrap::assemble(
        Arc::new(config),
        upstream.clone(),
        endpoint.clone(),
        Some(hub),
    )
    .unwrap();
    serve(state, upstream, endpoint).await
}

/// Like [`start`], with extra tools registered next to the built-in ones.
pub async fn start_with_tools(config: Config, extra: impl FnOnce(&mut ToolRegistry)) -> Harness {
    let upstream = Arc::new(MockUpstream::default());
    let endpoint = Arc::new(MockTokenEndpoint::default());
    let mut state = bootstrap::assemble(
        Arc::new(config),
        upstream.clone(),
        endpoint.clone(),
        None,
    )
    .unwrap();
    let mut registry = ToolRegistry::from_config(&state.config.tools);
    register_builtin(&mut registry, state.client.clone(), state.events.clone()).unwrap();
    extra(&mut registry);
    state.tools = Arc::new(registry);
    serve(state, upstream, endpoint).await
}

async fn serve(
    state: AppState,
    upstream: Arc<MockUpstream>,
    endpoint: Arc<MockTokenEndpoint>,
) -> Harness {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router().with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Harness {
        base: format!("http://{addr}"),
        state,
        upstream,
        endpoint,
        http: reqwest::Client::new(),
    }
}

impl Harness {
    pub async fn connect(&self) -> StreamClient {
        self.connect_with(None).await
    }

    pub async fn connect_with(&self, bearer: Option<&str>) -> StreamClient {
        let mut req = self.http.get(format!("{}/sse", self.base));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 200);

        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| String::from_utf8_lossy(&b).into_owned()))
            .boxed();
        let mut client = StreamClient {
            chunks,
            buffer: String::new(),
            pending: VecDeque::new(),
            endpoint: String::new(),
            session_id: String::new(),
            base: self.base.clone(),
            http: self.http.clone(),
        };

        let first = client.next_event().await;
        assert_eq!(first.name(), "endpoint");
        client.session_id = first
            .data
            .split("session_id=")
            .nth(1)
            .unwrap()
            .to_owned();
        client.endpoint = first.data;
        client
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.http
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }
}

// ── Stream client ───────────────────────────────────────────────────

pub struct StreamClient {
    chunks: BoxStream<'static, reqwest::Result<String>>,
    buffer: String,
    pending: VecDeque<SseEvent>,
    pub endpoint: String,
    pub session_id: String,
    base: String,
    http: reqwest::Client,
}

impl StreamClient {
    pub async fn next_event(&mut self) -> SseEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            let chunk = tokio::time::timeout(READ_TIMEOUT, self.chunks.next())
                .await
                .expect("timed out waiting for an event")
                .expect("stream ended")
                .expect("stream read failed");
            self.buffer.push_str(&chunk);
            self.pending.extend(drain_events(&mut self.buffer));
        }
    }

    pub async fn next_frame(&mut self) -> Frame {
        let event = self.next_event().await;
        assert_eq!(event.name(), "message");
        Frame::decode(&event.data).unwrap()
    }

    /// Whether the server has closed the stream, within the read timeout.
    pub async fn ended(&mut self) -> bool {
        loop {
            match tokio::time::timeout(READ_TIMEOUT, self.chunks.next()).await {
                Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(chunk))) => {
                    self.buffer.push_str(&chunk);
                    if !drain_events(&mut self.buffer).is_empty() {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
    }

    pub async fn post_raw(&self, body: impl Into<String>) -> reqwest::Response {
        self.http
            .post(format!("{}{}", self.base, self.endpoint))
            .body(body.into())
            .send()
            .await
            .unwrap()
    }

    pub async fn request(&self, id: i64, method: &str, params: Value) -> reqwest::StatusCode {
        let frame = Frame::request(id, method, params).encode().unwrap();
        self.post_raw(frame).await.status()
    }

    pub async fn call_tool(&self, id: i64, name: &str, arguments: Value) -> reqwest::StatusCode {
        self.request(id, "tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }
}

/// The `state` query parameter of an authorization URL.
pub fn state_param(url: &str) -> String {
    reqwest::Url::parse(url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}
