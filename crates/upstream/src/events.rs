//! Shared upstream event stream.
//!
//! Subscriptions are data: [`SubscriptionRegistry`] holds the durable,
//! reference-counted set of event-type filters and lives in the
//! [`EventHub`], independent of any WebSocket. [`EventStream`] owns the
//! connection task; every (re)connect builds fresh per-connection state
//! and re-subscribes whatever the registry holds at that moment.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use hamcp_domain::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::client::UpstreamClient;
use crate::retry::RetryPolicy;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const BROADCAST_CAPACITY: usize = 256;

/// One event pushed by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamEvent {
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub time_fired: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable set of event-type filters, reference-counted so independent
/// subscribers of the same type share one upstream subscription.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    filters: Mutex<BTreeMap<String, usize>>,
}

impl SubscriptionRegistry {
    /// Add a reference. Returns `true` when the filter is new.
    pub fn acquire(&self, event_type: &str) -> bool {
        let mut filters = self.filters.lock();
        let count = filters.entry(event_type.to_owned()).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Drop a reference. Returns `true` when the last one went away.
    pub fn release(&self, event_type: &str) -> bool {
        let mut filters = self.filters.lock();
        match filters.get_mut(event_type) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                filters.remove(event_type);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.filters.lock().contains_key(event_type)
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.filters.lock().keys().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// Handle shared by everything that consumes upstream events.
///
/// The connection task is the only publisher; consumers listen or read the
/// recent-events log. References taken on behalf of a session are tracked
/// per session and returned by [`EventHub::release_session`].
pub struct EventHub {
    registry: SubscriptionRegistry,
    /// session id -> event type -> references held
    owners: Mutex<HashMap<String, HashMap<String, usize>>>,
    recent: RwLock<VecDeque<UpstreamEvent>>,
    recent_capacity: usize,
    events: broadcast::Sender<UpstreamEvent>,
    commands: mpsc::UnboundedSender<Command>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    connected: AtomicBool,
}

impl EventHub {
    pub fn new(recent_capacity: usize) -> Arc<Self> {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (commands, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: SubscriptionRegistry::default(),
            owners: Mutex::new(HashMap::new()),
            recent: RwLock::new(VecDeque::with_capacity(recent_capacity)),
            recent_capacity: recent_capacity.max(1),
            events,
            commands,
            command_rx: Mutex::new(Some(command_rx)),
            connected: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Register interest in `event_type`. Returns `true` when this created
    /// a new upstream subscription.
    pub fn subscribe(&self, event_type: &str) -> bool {
        let added = self.registry.acquire(event_type);
        if added {
            let _ = self.commands.send(Command::Subscribe(event_type.to_owned()));
        }
        added
    }

    /// Drop interest in `event_type`. Returns `true` when the upstream
    /// subscription was released.
    pub fn unsubscribe(&self, event_type: &str) -> bool {
        let removed = self.registry.release(event_type);
        if removed {
            let _ = self.commands.send(Command::Unsubscribe(event_type.to_owned()));
        }
        removed
    }

    /// [`subscribe`](Self::subscribe) on behalf of `session_id`.
    pub fn subscribe_for(&self, session_id: &str, event_type: &str) -> bool {
        *self
            .owners
            .lock()
            .entry(session_id.to_owned())
            .or_default()
            .entry(event_type.to_owned())
            .or_insert(0) += 1;
        self.subscribe(event_type)
    }

    /// Drop one of `session_id`'s references to `event_type`. `None` when the
    /// session holds none; otherwise whether the upstream subscription went
    /// away.
    pub fn unsubscribe_for(&self, session_id: &str, event_type: &str) -> Option<bool> {
        {
            let mut owners = self.owners.lock();
            let held = owners.get_mut(session_id)?;
            let count = held.get_mut(event_type)?;
            *count -= 1;
            if *count == 0 {
                held.remove(event_type);
            }
            if held.is_empty() {
                owners.remove(session_id);
            }
        }
        Some(self.unsubscribe(event_type))
    }

    /// Return every reference `session_id` still holds. Returns how many.
    pub fn release_session(&self, session_id: &str) -> usize {
        let Some(held) = self.owners.lock().remove(session_id) else {
            return 0;
        };
        let mut released = 0;
        for (event_type, count) in held {
            for _ in 0..count {
                self.unsubscribe(&event_type);
            }
            released += count;
        }
        if released > 0 {
            tracing::debug!(session_id, released, "session event subscriptions released");
        }
        released
    }

    pub fn listen(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.events.subscribe()
    }

    /// Most recent events, oldest first, optionally filtered by type.
    pub fn recent(&self, event_type: Option<&str>, limit: usize) -> Vec<UpstreamEvent> {
        let recent = self.recent.read();
        let mut out: Vec<UpstreamEvent> = recent
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Append to the recent log and fan out to listeners.
    pub fn publish(&self, event: UpstreamEvent) {
        {
            let mut recent = self.recent.write();
            if recent.len() >= self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        let _ = self.events.send(event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    AuthRequired {},
    AuthOk {},
    AuthInvalid {
        #[serde(default)]
        message: String,
    },
    Result {
        id: u64,
        #[serde(default)]
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    Event {
        event: UpstreamEvent,
    },
    #[serde(other)]
    Other,
}

fn ws_err(e: tungstenite::Error) -> Error {
    Error::Transport(format!("event stream: {e}"))
}

/// `http://host:8123` → `ws://host:8123/api/websocket`.
pub fn websocket_url(base_url: &str) -> Result<String> {
    let base = base_url.trim_end_matches('/');
    let ws = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(Error::Config(format!("unsupported upstream URL scheme: {base_url}")));
    };
    Ok(format!("{ws}/api/websocket"))
}

/// Per-connection state, discarded on disconnect.
#[derive(Default)]
struct Connection {
    next_id: u64,
    /// event type → subscription id
    subscriptions: HashMap<String, u64>,
}

impl Connection {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    async fn subscribe<S>(&mut self, sink: &mut S, event_type: &str) -> Result<()>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        if self.subscriptions.contains_key(event_type) {
            return Ok(());
        }
        let id = self.next_id();
        let msg = json!({ "id": id, "type": "subscribe_events", "event_type": event_type });
        sink.send(Message::Text(msg.to_string())).await.map_err(ws_err)?;
        self.subscriptions.insert(event_type.to_owned(), id);
        tracing::debug!(event_type, subscription = id, "subscribed to upstream events");
        Ok(())
    }

    async fn unsubscribe<S>(&mut self, sink: &mut S, event_type: &str) -> Result<()>
    where
        S: Sink<Message, Error = tungstenite::Error> + Unpin,
    {
        let Some(subscription) = self.subscriptions.remove(event_type) else {
            return Ok(());
        };
        let id = self.next_id();
        let msg = json!({ "id": id, "type": "unsubscribe_events", "subscription": subscription });
        sink.send(Message::Text(msg.to_string())).await.map_err(ws_err)?;
        tracing::debug!(event_type, subscription, "unsubscribed from upstream events");
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Connection task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventStream {
    hub: Arc<EventHub>,
    ws_url: String,
    token: String,
    retry: RetryPolicy,
    client: Option<Arc<UpstreamClient>>,
}

impl EventStream {
    pub fn new(hub: Arc<EventHub>, base_url: &str, token: String, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            hub,
            ws_url: websocket_url(base_url)?,
            token,
            retry,
            client: None,
        })
    }

    /// Invalidate the client's cached states whenever a `state_changed`
    /// event arrives.
    pub fn with_client(mut self, client: Arc<UpstreamClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Start the connection task. Only one stream may run per hub.
    pub fn spawn(self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        let commands = self
            .hub
            .command_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Other("event stream already running for this hub".into()))?;
        Ok(tokio::spawn(self.run(commands, cancel)))
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>, cancel: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let result = self.connect_once(&mut commands, &cancel, &mut failures).await;
            self.hub.connected.store(false, Ordering::Relaxed);
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = result {
                tracing::warn!(error = %e, failures = failures + 1, "upstream event stream dropped");
            }

            let delay = self.retry.delay_for_attempt(failures);
            failures = failures.saturating_add(1);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::info!("upstream event stream stopped");
    }

    async fn connect_once(
        &self,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        cancel: &CancellationToken,
        failures: &mut u32,
    ) -> Result<()> {
        let (ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .map_err(ws_err)?;
        let (mut sink, mut stream) = ws.split();

        // auth_required → auth → auth_ok
        loop {
            let next = tokio::time::timeout(AUTH_TIMEOUT, stream.next())
                .await
                .map_err(|_| Error::Timeout("event stream authentication".into()))?;
            let text = match next {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ws_err(e)),
                None => return Err(Error::Transport("event stream closed during auth".into())),
            };
            match serde_json::from_str::<Inbound>(&text)? {
                Inbound::AuthRequired {} => {
                    let auth = json!({ "type": "auth", "access_token": self.token });
                    sink.send(Message::Text(auth.to_string())).await.map_err(ws_err)?;
                }
                Inbound::AuthOk {} => break,
                Inbound::AuthInvalid { message } => {
                    return Err(Error::Transport(format!("event stream auth rejected: {message}")));
                }
                _ => {}
            }
        }

        *failures = 0;
        self.hub.connected.store(true, Ordering::Relaxed);
        let mut conn = Connection::default();
        let filters = self.hub.registry.snapshot();
        for filter in &filters {
            conn.subscribe(&mut sink, filter).await?;
        }
        tracing::info!(url = %self.ws_url, filters = filters.len(), "upstream event stream connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                Some(cmd) = commands.recv() => match cmd {
                    Command::Subscribe(t) if self.hub.registry.contains(&t) => {
                        conn.subscribe(&mut sink, &t).await?;
                    }
                    Command::Unsubscribe(t) if !self.hub.registry.contains(&t) => {
                        conn.unsubscribe(&mut sink, &t).await?;
                    }
                    _ => {}
                },
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&mut conn, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        sink.send(Message::Pong(payload)).await.map_err(ws_err)?;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(Error::Transport("upstream closed the event stream".into()));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ws_err(e)),
                },
            }
        }
    }

    fn handle_text(&self, conn: &mut Connection, text: &str) {
        match serde_json::from_str::<Inbound>(text) {
            Ok(Inbound::Event { event }) => self.deliver(event),
            Ok(Inbound::Result { id, success: false, error }) => {
                conn.subscriptions.retain(|event_type, sub| {
                    if *sub == id {
                        tracing::warn!(event_type = %event_type, error = ?error, "upstream refused subscription");
                    }
                    *sub != id
                });
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "ignoring unparsable event stream message"),
        }
    }

    fn deliver(&self, event: UpstreamEvent) {
        if event.event_type == "state_changed" {
            if let Some(client) = &self.client {
                client.invalidate("/api/states");
            }
        }
        self.hub.publish(event);
    }
}
