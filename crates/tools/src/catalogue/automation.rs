//! `ha_automation`: automations, scripts and scenes.

use std::sync::Arc;

use async_trait::async_trait;
use hamcp_domain::{Error, Result};
use hamcp_upstream::UpstreamClient;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{in_domain, parse_args};
use crate::registry::{ToolContext, ToolDescriptor, ToolHandler};
use crate::schema::{ParamSchema, ParamSpec};

const AUTOMATION_ID: &str = r"^automation\.[a-z0-9_]+$";
const SCRIPT_ID: &str = r"^script\.[a-z0-9_]+$";
const SCENE_ID: &str = r"^scene\.[a-z0-9_]+$";

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum AutomationOp {
    ListAutomations,
    GetAutomation {
        entity_id: String,
    },
    TriggerAutomation {
        entity_id: String,
        #[serde(default)]
        skip_condition: bool,
    },
    ToggleAutomation {
        entity_id: String,
        enabled: Option<bool>,
    },
    ListScripts,
    RunScript {
        entity_id: String,
        variables: Option<Value>,
    },
    ListScenes,
    ActivateScene {
        entity_id: String,
    },
}

pub struct AutomationTool {
    client: Arc<UpstreamClient>,
}

impl AutomationTool {
    pub fn descriptor(client: Arc<UpstreamClient>) -> Result<ToolDescriptor> {
        let id = |re: &str, what: &str| {
            ParamSpec::string("entity_id", format!("{what} entity id"))
                .required()
                .pattern(re)
        };
        let schema = ParamSchema::variants()
            .op("list_automations", "List automations with their state", vec![])
            .op("get_automation", "Fetch one automation", vec![id(AUTOMATION_ID, "Automation")?])
            .op(
                "trigger_automation",
                "Run an automation's actions now",
                vec![
                    id(AUTOMATION_ID, "Automation")?,
                    ParamSpec::boolean("skip_condition", "Skip the automation's conditions"),
                ],
            )
            .op(
                "toggle_automation",
                "Enable, disable or toggle an automation",
                vec![
                    id(AUTOMATION_ID, "Automation")?,
                    ParamSpec::boolean("enabled", "Target state; omitted toggles"),
                ],
            )
            .op("list_scripts", "List scripts", vec![])
            .op(
                "run_script",
                "Run a script",
                vec![
                    id(SCRIPT_ID, "Script")?,
                    ParamSpec::object("variables", "Script variables"),
                ],
            )
            .op("list_scenes", "List scenes", vec![])
            .op("activate_scene", "Activate a scene", vec![id(SCENE_ID, "Scene")?])
            .build();

        Ok(ToolDescriptor::new(
            "ha_automation",
            "Inspect and run automations, scripts and scenes.",
            schema,
            Arc::new(Self { client }),
        ))
    }

    async fn list(&self, ctx: &ToolContext, domain: &str) -> Result<Value> {
        let states = self.client.get_states(ctx.upstream()).await?;
        let items: Vec<Value> = in_domain(&states, domain)
            .map(|s| {
                json!({
                    "entity_id": s.get("entity_id"),
                    "name": s.pointer("/attributes/friendly_name"),
                    "state": s.get("state"),
                    "last_triggered": s.pointer("/attributes/last_triggered"),
                })
            })
            .collect();
        Ok(json!({ "domain": domain, "count": items.len(), "items": items }))
    }
}

#[async_trait]
impl ToolHandler for AutomationTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        let cx = ctx.upstream();
        match parse_args::<AutomationOp>(args)? {
            AutomationOp::ListAutomations => self.list(ctx, "automation").await,
            AutomationOp::ListScripts => self.list(ctx, "script").await,
            AutomationOp::ListScenes => self.list(ctx, "scene").await,

            AutomationOp::GetAutomation { entity_id } => {
                self.client.get_state(&entity_id, cx).await.map_err(|e| match e {
                    Error::UpstreamRejected { status: 404, .. } => {
                        Error::validation("entity_id", format!("no automation named {entity_id}"))
                    }
                    other => other,
                })
            }

            AutomationOp::TriggerAutomation {
                entity_id,
                skip_condition,
            } => {
                let data = json!({ "entity_id": entity_id, "skip_condition": skip_condition });
                self.client.call_service("automation", "trigger", data, cx).await
            }

            AutomationOp::ToggleAutomation { entity_id, enabled } => {
                let service = match enabled {
                    Some(true) => "turn_on",
                    Some(false) => "turn_off",
                    None => "toggle",
                };
                self.client
                    .call_service("automation", service, json!({ "entity_id": entity_id }), cx)
                    .await
            }

            AutomationOp::RunScript {
                entity_id,
                variables,
            } => {
                let mut data = json!({ "entity_id": entity_id });
                if let Some(vars) = variables {
                    data["variables"] = vars;
                }
                self.client.call_service("script", "turn_on", data, cx).await
            }

            AutomationOp::ActivateScene { entity_id } => {
                self.client
                    .call_service("scene", "turn_on", json!({ "entity_id": entity_id }), cx)
                    .await
            }
        }
    }
}
