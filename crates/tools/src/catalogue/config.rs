//! `ha_config`: controller configuration, logs and YAML checks.

use std::sync::Arc;

use async_trait::async_trait;
use hamcp_domain::Result;
use hamcp_upstream::UpstreamClient;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::registry::{ToolContext, ToolDescriptor, ToolHandler};
use crate::schema::{ParamSchema, ParamSpec};

fn d_lines() -> usize {
    200
}

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum ConfigOp {
    GetConfig,
    CheckConfig,
    GetLogs {
        #[serde(default = "d_lines")]
        lines: usize,
        filter: Option<String>,
    },
    ValidateYaml {
        content: String,
    },
}

pub struct ConfigTool {
    client: Arc<UpstreamClient>,
}

impl ConfigTool {
    pub fn descriptor(client: Arc<UpstreamClient>) -> Result<ToolDescriptor> {
        let schema = ParamSchema::variants()
            .op("get_config", "Controller configuration summary", vec![])
            .op("check_config", "Ask the controller to check its configuration", vec![])
            .op(
                "get_logs",
                "Tail of the controller error log",
                vec![
                    ParamSpec::integer("lines", "Lines from the end (default 200)").range(1.0, 5000.0),
                    ParamSpec::string("filter", "Case-insensitive substring filter"),
                ],
            )
            .op(
                "validate_yaml",
                "Check that a YAML document parses",
                vec![ParamSpec::string("content", "YAML text").required()],
            )
            .build();

        Ok(ToolDescriptor::new(
            "ha_config",
            "Inspect controller configuration and logs; validate YAML.",
            schema,
            Arc::new(Self { client }),
        ))
    }
}

#[async_trait]
impl ToolHandler for ConfigTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        match parse_args::<ConfigOp>(args)? {
            ConfigOp::GetConfig => self.client.get_config(ctx.upstream()).await,
            ConfigOp::CheckConfig => self.client.check_config(ctx.upstream()).await,
            ConfigOp::GetLogs { lines, filter } => {
                let log = self.client.get_error_log(ctx.upstream()).await?;
                let text = match &log {
                    Value::String(s) => s.as_str(),
                    Value::Null => "",
                    other => return Ok(other.clone()),
                };
                Ok(tail_log(text, lines, filter.as_deref()))
            }
            ConfigOp::ValidateYaml { content } => Ok(validate_yaml(&content)),
        }
    }
}

/// Last `lines` log lines, optionally filtered first.
fn tail_log(text: &str, lines: usize, filter: Option<&str>) -> Value {
    let needle = filter.map(str::to_lowercase);
    let matching: Vec<&str> = text
        .lines()
        .filter(|l| needle.as_deref().map_or(true, |n| l.to_lowercase().contains(n)))
        .collect();
    let start = matching.len().saturating_sub(lines);
    let tail = &matching[start..];
    json!({
        "total_lines": matching.len(),
        "returned": tail.len(),
        "lines": tail,
    })
}

fn validate_yaml(content: &str) -> Value {
    match serde_yaml::from_str::<serde_yaml::Value>(content) {
        Ok(_) => json!({ "valid": true }),
        Err(e) => {
            let location = e
                .location()
                .map(|loc| json!({ "line": loc.line(), "column": loc.column() }));
            json!({ "valid": false, "error": e.to_string(), "location": location })
        }
    }
}
