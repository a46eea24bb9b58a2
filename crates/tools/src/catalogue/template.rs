//! `ha_template`: server-side template rendering.

use std::sync::Arc;

use async_trait::async_trait;
use hamcp_domain::Result;
use hamcp_upstream::UpstreamClient;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::registry::{ToolContext, ToolDescriptor, ToolHandler};
use crate::schema::{ParamSchema, ParamSpec};

#[derive(Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
enum TemplateOp {
    Render {
        template: String,
        variables: Option<Value>,
    },
}

pub struct TemplateTool {
    client: Arc<UpstreamClient>,
}

impl TemplateTool {
    pub fn descriptor(client: Arc<UpstreamClient>) -> Result<ToolDescriptor> {
        let schema = ParamSchema::variants()
            .op(
                "render",
                "Render a template against live state",
                vec![
                    ParamSpec::string("template", "Template source").required(),
                    ParamSpec::object("variables", "Extra template variables"),
                ],
            )
            .build();

        Ok(ToolDescriptor::new(
            "ha_template",
            "Render templates on the controller.",
            schema,
            Arc::new(Self { client }),
        ))
    }
}

#[async_trait]
impl ToolHandler for TemplateTool {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value> {
        match parse_args::<TemplateOp>(args)? {
            TemplateOp::Render {
                template,
                variables,
            } => {
                let rendered = self
                    .client
                    .render_template(&template, variables, ctx.upstream())
                    .await?;
                Ok(json!({ "rendered": rendered }))
            }
        }
    }
}
