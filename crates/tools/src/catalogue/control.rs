//! `ha_control`: entity state, services and events.

use std::sync::Arc;

use async_trait::async_trait;
use hamcp_domain::Result;
use hamcp_upstream::UpstreamClient;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{entity_domain, parse_args, ENTITY_ID, EVENT_TYPE, SLUG};
use crate::registry::{ToolContext, ToolDescriptor, ToolHandler};
use crate::schema::{ParamSchema, ParamSpec};

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum ControlOp {
    GetEntities {
        domain: Option<String>,
        friendly_name: Option<String>,
        state: Option<String>,
        limit: Option<usize>,
    },
    GetEntity {
        entity_id: String,
    },
    SetEntity {
        entity_id: String,
        state: String,
        attributes: Option<Value>,
    },
    CallService {
        domain: String,
        service: String,
        entity_id: Option<String>,
        data: Option<Map<String, Value>>,
    },
    GetServices {
        domain: Option<String>,
    },
    FireEvent {
        event_type: String,
        data: Option<Value>,
    },
    GetEvents,
}

pub struct ControlTool {
    client: Arc<UpstreamClient>,
}

impl ControlTool {
    pub fn descriptor(client: Arc<UpstreamClient>) -> Result<ToolDescriptor> {
        let entity_id = || {
            ParamSpec::string("entity_id", "Entity id, e.g. light.kitchen")
                .required()
                .pattern(ENTITY_ID)
        };
        let schema = ParamSchema::variants()
            .op(
                "get_entities",
                "List entity states, optionally filtered",
                vec![
                    ParamSpec::string("domain", "Only entities of this domain").pattern(SLUG)?,
                    ParamSpec::string("friendly_name", "Case-insensitive substring of the friendly name"),
                    ParamSpec::string("state", "Only entities in this state"),
                    ParamSpec::integer("limit", "Maximum entities returned").range(1.0, 1000.0),
                ],
            )
            .op("get_entity", "Fetch one entity state", vec![entity_id()?])
            .op(
                "set_entity",
                "Write an entity state in the controller's state machine",
                vec![
                    entity_id()?,
                    ParamSpec::string("state", "New state").required(),
                    ParamSpec::object("attributes", "State attributes"),
                ],
            )
            .op(
                "call_service",
                "Call a service, e.g. light.turn_on",
                vec![
                    ParamSpec::string("domain", "Service domain").required().pattern(SLUG)?,
                    ParamSpec::string("service", "Service name").required().pattern(SLUG)?,
                    ParamSpec::string("entity_id", "Target entity").pattern(ENTITY_ID)?,
                    ParamSpec::object("data", "Service data"),
                ],
            )
            .op(
                "get_services",
                "List available services",
                vec![ParamSpec::string("domain", "Only this domain").pattern(SLUG)?],
            )
            .op(
                "fire_event",
                "Fire a custom event",
                vec![
                    ParamSpec::string("event_type", "Event type").required().pattern(EVENT_TYPE)?,
                    ParamSpec::object("data", "Event data"),
                ],
            )
            .op("get_events", "List event types with listener counts", vec![])
            .build();

        Ok(ToolDescriptor::new(
            "ha_control",
            "Read and control entities, call services and fire events.",
            schema,
            Arc::new(Self { client }),
        ))
    }
}

#[async_trait]
impl ToolHandler for ControlTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let cx = ctx.upstream();
        match parse_args::<ControlOp>(args)? {
            ControlOp::GetEntities {
                domain,
                friendly_name,
                state,
                limit,
            } => {
                let states = self.client.get_states(cx).await?;
                let needle = friendly_name.map(|n| n.to_lowercase());
                let entities: Vec<Value> = states
                    .into_iter()
                    .filter(|s| {
                        let id = s.get("entity_id").and_then(Value::as_str).unwrap_or_default();
                        domain.as_deref().map_or(true, |d| entity_domain(id) == d)
                    })
                    .filter(|s| {
                        state
                            .as_deref()
                            .map_or(true, |want| s.get("state").and_then(Value::as_str) == Some(want))
                    })
                    .filter(|s| {
                        needle.as_deref().map_or(true, |n| {
                            s.pointer("/attributes/friendly_name")
                                .and_then(Value::as_str)
                                .is_some_and(|name| name.to_lowercase().contains(n))
                        })
                    })
                    .take(limit.unwrap_or(usize::MAX))
                    .collect();
                Ok(json!({ "count": entities.len(), "entities": entities }))
            }

            ControlOp::GetEntity { entity_id } => self.client.get_state(&entity_id, cx).await,

            ControlOp::SetEntity {
                entity_id,
                state,
                attributes,
            } => {
                self.client
                    .set_state(&entity_id, &state, attributes, cx)
                    .await
            }

            ControlOp::CallService {
                domain,
                service,
                entity_id,
                data,
            } => {
                let mut body = data.unwrap_or_default();
                if let Some(id) = entity_id {
                    body.insert("entity_id".into(), Value::String(id));
                }
                let changed = self
                    .client
                    .call_service(&domain, &service, Value::Object(body), cx)
                    .await?;
                Ok(json!({ "service": format!("{domain}.{service}"), "changed_states": changed }))
            }

            ControlOp::GetServices { domain } => {
                let services = self.client.get_services(cx).await?;
                match (domain, services) {
                    (Some(d), Value::Array(items)) => Ok(Value::Array(
                        items
                            .into_iter()
                            .filter(|item| item.get("domain").and_then(Value::as_str) == Some(d.as_str()))
                            .collect(),
                    )),
                    (_, services) => Ok(services),
                }
            }

            ControlOp::FireEvent { event_type, data } => {
                self.client
                    .fire_event(&event_type, data.unwrap_or_else(|| json!({})), cx)
                    .await
            }

            ControlOp::GetEvents => self.client.get_events(cx).await,
        }
    }
}
