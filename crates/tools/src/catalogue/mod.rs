//! Built-in controller tools.
//!
//! One tool per area, many operations per tool: each handler deserializes
//! its (already validated) arguments into a `#[serde(tag = "operation")]`
//! enum and matches on it.

mod automation;
mod config;
mod control;
mod events;
mod template;

use std::sync::Arc;

use hamcp_domain::{Error, Result};
use hamcp_upstream::{EventHub, UpstreamClient};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::registry::ToolRegistry;

pub use automation::AutomationTool;
pub use config::ConfigTool;
pub use control::ControlTool;
pub use events::EventsTool;
pub use template::TemplateTool;

pub(crate) const ENTITY_ID: &str = r"^[a-z0-9_]+\.[a-z0-9_]+$";
pub(crate) const SLUG: &str = r"^[a-z0-9_]+$";
pub(crate) const EVENT_TYPE: &str = r"^[A-Za-z0-9_]+$";

/// Register every built-in tool. `ha_events` is only offered when the
/// upstream event stream runs.
pub fn register_builtin(
    registry: &mut ToolRegistry,
    client: Arc<UpstreamClient>,
    events: Option<Arc<EventHub>>,
) -> Result<()> {
    registry.register(ControlTool::descriptor(client.clone())?)?;
    registry.register(AutomationTool::descriptor(client.clone())?)?;
    registry.register(ConfigTool::descriptor(client.clone())?)?;
    registry.register(TemplateTool::descriptor(client)?)?;
    if let Some(hub) = events {
        registry.register(EventsTool::descriptor(hub)?)?;
    }
    Ok(())
}

/// Deserialize validated arguments into an operation enum.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| Error::validation("arguments", e.to_string()))
}

/// `domain` part of an entity id.
pub(crate) fn entity_domain(entity_id: &str) -> &str {
    entity_id.split_once('.').map_or(entity_id, |(d, _)| d)
}

/// States whose entity id lives in `domain`.
pub(crate) fn in_domain<'a>(states: &'a [Value], domain: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
    states.iter().filter(move |s| {
        s.get("entity_id")
            .and_then(Value::as_str)
            .is_some_and(|id| entity_domain(id) == domain)
    })
}
