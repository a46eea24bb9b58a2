//! `ha_events`: upstream event subscriptions and waits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hamcp_domain::{Error, Result};
use hamcp_upstream::{EventHub, UpstreamEvent};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;

use super::{parse_args, ENTITY_ID, EVENT_TYPE};
use crate::registry::{ToolContext, ToolDescriptor, ToolHandler};
use crate::schema::{ParamSchema, ParamSpec};

const TOOL_TIMEOUT: Duration = Duration::from_secs(90);
const PROGRESS_EVERY: Duration = Duration::from_secs(5);

fn d_recent_limit() -> usize {
    20
}

fn d_wait_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum EventsOp {
    Subscribe {
        event_type: String,
    },
    Unsubscribe {
        event_type: String,
    },
    Recent {
        event_type: Option<String>,
        #[serde(default = "d_recent_limit")]
        limit: usize,
    },
    WaitFor {
        event_type: String,
        entity_id: Option<String>,
        #[serde(default = "d_wait_secs")]
        timeout_secs: u64,
    },
}

pub struct EventsTool {
    hub: Arc<EventHub>,
}

impl EventsTool {
    pub fn descriptor(hub: Arc<EventHub>) -> Result<ToolDescriptor> {
        let event_type = || ParamSpec::string("event_type", "Event type, e.g. state_changed").pattern(EVENT_TYPE);
        let schema = ParamSchema::variants()
            .op(
                "subscribe",
                "Start recording events of a type",
                vec![event_type()?.required()],
            )
            .op(
                "unsubscribe",
                "Stop recording events of a type",
                vec![event_type()?.required()],
            )
            .op(
                "recent",
                "Recently recorded events, oldest first",
                vec![
                    event_type()?,
                    ParamSpec::integer("limit", "Maximum events (default 20)").range(1.0, 100.0),
                ],
            )
            .op(
                "wait_for",
                "Block until a matching event arrives",
                vec![
                    event_type()?.required(),
                    ParamSpec::string("entity_id", "Only events about this entity").pattern(ENTITY_ID)?,
                    ParamSpec::integer("timeout_secs", "Give up after this long (default 60)").range(1.0, 85.0),
                ],
            )
            .build();

        Ok(ToolDescriptor::new(
            "ha_events",
            "Subscribe to controller events, read recent ones, or wait for one. \
             Subscriptions last until unsubscribed or the session closes.",
            schema,
            Arc::new(Self { hub }),
        )
        .with_timeout(TOOL_TIMEOUT)
        .streaming())
    }

    async fn wait_for(
        &self,
        ctx: &ToolContext,
        event_type: &str,
        entity_id: Option<&str>,
        wait: Duration,
    ) -> Result<Value> {
        // Listen before subscribing so nothing published in between is lost.
        let mut rx = self.hub.listen();
        let _held = Held::acquire(&self.hub, event_type);

        let started = Instant::now();
        let deadline = started + wait;
        let mut ticker = tokio::time::interval_at(started + PROGRESS_EVERY, PROGRESS_EVERY);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(json!({
                        "matched": false,
                        "waited_secs": wait.as_secs(),
                    }));
                }
                _ = ticker.tick() => {
                    ctx.progress(json!({
                        "status": "waiting",
                        "event_type": event_type,
                        "elapsed_secs": started.elapsed().as_secs(),
                    }));
                }
                received = rx.recv() => match received {
                    Ok(event) if matches(&event, event_type, entity_id) => {
                        return Ok(json!({ "matched": true, "event": event }));
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, event_type, "event waiter lagged");
                    }
                    Err(RecvError::Closed) => {
                        return Err(Error::UpstreamUnavailable("event stream closed".into()));
                    }
                },
            }
        }
    }
}

#[async_trait]
impl ToolHandler for EventsTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        match parse_args::<EventsOp>(args)? {
            EventsOp::Subscribe { event_type } => {
                let created = self.hub.subscribe_for(&ctx.session_id, &event_type);
                Ok(json!({
                    "event_type": event_type,
                    "subscribed": true,
                    "new_subscription": created,
                    "connected": self.hub.is_connected(),
                }))
            }
            EventsOp::Unsubscribe { event_type } => {
                let released = self.hub.unsubscribe_for(&ctx.session_id, &event_type);
                Ok(json!({
                    "event_type": event_type,
                    "was_subscribed": released.is_some(),
                    "released": released.unwrap_or(false),
                }))
            }
            EventsOp::Recent { event_type, limit } => {
                let events = self.hub.recent(event_type.as_deref(), limit);
                Ok(json!({ "count": events.len(), "events": events }))
            }
            EventsOp::WaitFor {
                event_type,
                entity_id,
                timeout_secs,
            } => {
                let wait = Duration::from_secs(timeout_secs).min(ctx.remaining());
                self.wait_for(ctx, &event_type, entity_id.as_deref(), wait)
                    .await
            }
        }
    }
}

/// One subscription reference, dropped when the wait ends however it ends.
struct Held<'a> {
    hub: &'a EventHub,
    event_type: &'a str,
}

impl<'a> Held<'a> {
    fn acquire(hub: &'a EventHub, event_type: &'a str) -> Self {
        hub.subscribe(event_type);
        Self { hub, event_type }
    }
}

impl Drop for Held<'_> {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.event_type);
    }
}

fn matches(event: &UpstreamEvent, event_type: &str, entity_id: Option<&str>) -> bool {
    if event.event_type != event_type {
        return false;
    }
    let Some(want) = entity_id else {
        return true;
    };
    let about = event
        .data
        .get("entity_id")
        .or_else(|| event.data.pointer("/new_state/entity_id"))
        .and_then(Value::as_str);
    about == Some(want)
}
