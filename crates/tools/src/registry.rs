//! Tool descriptors, resolution and timed invocation.
//!
//! The registry is built once at start-up, then shared read-only behind an
//! `Arc`. Handlers only ever see arguments that passed their schema.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hamcp_domain::config::ToolsConfig;
use hamcp_domain::{Error, Result};
use hamcp_protocol::messages::ToolDef;
use hamcp_protocol::RequestId;
use hamcp_upstream::CallContext;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::schema::ParamSchema;

pub type ProgressSink = Arc<dyn Fn(Value) + Send + Sync>;

/// Everything a handler may use besides its arguments.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub request_id: RequestId,
    pub deadline: Instant,
    pub cancel: CancellationToken,
    token: String,
    progress: Option<ProgressSink>,
}

impl ToolContext {
    /// Upstream call context: the session's token, bounded by the deadline.
    pub fn upstream(&self) -> CallContext<'_> {
        CallContext::new(&self.token).with_deadline(self.deadline)
    }

    /// Emit a progress notification (streaming tools).
    pub fn progress(&self, value: Value) {
        if let Some(sink) = &self.progress {
            sink(value);
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .field("deadline", &self.deadline)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value>;
}

pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub schema: ParamSchema,
    pub handler: Arc<dyn ToolHandler>,
    /// Overrides the registry default.
    pub timeout: Option<Duration>,
    /// Replies may overtake earlier requests; progress is emitted.
    pub streaming: bool,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ParamSchema,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler,
            timeout: None,
            streaming: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }
}

/// A tool call whose arguments passed validation.
pub struct Resolved {
    pub descriptor: Arc<ToolDescriptor>,
    pub arguments: Value,
}

/// Per-call inputs supplied by the dispatcher.
pub struct Invocation {
    pub session_id: String,
    pub request_id: RequestId,
    pub token: String,
    pub cancel: CancellationToken,
    pub progress: Option<ProgressSink>,
}

pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<ToolDescriptor>>,
    default_timeout: Duration,
    overrides: HashMap<String, Duration>,
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            default_timeout,
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(cfg: &ToolsConfig) -> Self {
        let mut registry = Self::new(Duration::from_secs(cfg.default_timeout_secs));
        registry.overrides = cfg
            .timeouts
            .iter()
            .map(|(name, secs)| (name.clone(), Duration::from_secs(*secs)))
            .collect();
        registry
    }

    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        if self.tools.contains_key(&descriptor.name) {
            return Err(Error::Config(format!(
                "tool `{}` is already registered",
                descriptor.name
            )));
        }
        tracing::debug!(tool = %descriptor.name, streaming = descriptor.streaming, "tool registered");
        self.tools
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ToolDescriptor>> {
        self.tools.get(name)
    }

    pub fn is_streaming(&self, name: &str) -> bool {
        self.tools.get(name).is_some_and(|d| d.streaming)
    }

    /// Config override, then the tool's own override, then the default.
    pub fn timeout_for(&self, descriptor: &ToolDescriptor) -> Duration {
        self.overrides
            .get(&descriptor.name)
            .copied()
            .or(descriptor.timeout)
            .unwrap_or(self.default_timeout)
    }

    /// Look up `name` and validate `arguments` against its schema.
    pub fn resolve(&self, name: &str, arguments: Value) -> Result<Resolved> {
        let descriptor = self
            .tools
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTool(name.to_owned()))?;
        let arguments = descriptor.schema.validate(arguments)?;
        Ok(Resolved {
            descriptor,
            arguments,
        })
    }

    /// Run a resolved call under its deadline. Dropping the handler future
    /// on timeout or cancellation aborts whatever it was awaiting.
    pub async fn invoke(&self, resolved: Resolved, inv: Invocation) -> Result<Value> {
        let Resolved {
            descriptor,
            arguments,
        } = resolved;
        let timeout = self.timeout_for(&descriptor);
        let started = Instant::now();
        let ctx = ToolContext {
            session_id: inv.session_id,
            request_id: inv.request_id,
            deadline: started + timeout,
            cancel: inv.cancel,
            token: inv.token,
            progress: inv.progress,
        };

        let outcome = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(Error::Cancelled(format!("{} was cancelled", descriptor.name))),
            res = tokio::time::timeout_at(ctx.deadline, descriptor.handler.call(&ctx, arguments)) => {
                res.unwrap_or_else(|_| {
                    Err(Error::Timeout(format!(
                        "{} exceeded {}s",
                        descriptor.name,
                        timeout.as_secs()
                    )))
                })
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => tracing::info!(
                tool = %descriptor.name,
                session_id = %ctx.session_id,
                request_id = %ctx.request_id,
                duration_ms,
                "tool call complete"
            ),
            Err(e) => tracing::warn!(
                tool = %descriptor.name,
                session_id = %ctx.session_id,
                request_id = %ctx.request_id,
                duration_ms,
                kind = %e.kind(),
                error = %e,
                "tool call failed"
            ),
        }
        outcome
    }

    /// Descriptors rendered for `tools/list`, sorted by name.
    pub fn list(&self) -> Vec<ToolDef> {
        self.tools
            .values()
            .map(|d| ToolDef {
                name: d.name.clone(),
                description: d.description.clone(),
                input_schema: d.schema.to_json_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ObjectSchema, ParamSpec};
    use hamcp_domain::ErrorKind;
    use serde_json::json;

    struct Sleepy(Duration);

    #[async_trait]
    impl ToolHandler for Sleepy {
        async fn call(&self, _ctx: &ToolContext, args: Value) -> Result<Value> {
            tokio::time::sleep(self.0).await;
            Ok(args)
        }
    }

    fn descriptor(name: &str, delay: Duration) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            "test tool",
            ParamSchema::Object(ObjectSchema::new(vec![ParamSpec::string("x", "x")])),
            Arc::new(Sleepy(delay)),
        )
    }

    fn invocation(cancel: CancellationToken) -> Invocation {
        Invocation {
            session_id: "s".into(),
            request_id: RequestId::Number(1),
            token: "t".into(),
            cancel,
            progress: None,
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut r = ToolRegistry::new(Duration::from_secs(30));
        r.register(descriptor("a", Duration::ZERO)).unwrap();
        assert!(r.register(descriptor("a", Duration::ZERO)).is_err());
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn resolve_rejects_unknown_tools_and_bad_arguments() {
        let mut r = ToolRegistry::new(Duration::from_secs(30));
        r.register(descriptor("a", Duration::ZERO)).unwrap();
        assert_eq!(r.resolve("b", json!({})).err().unwrap().kind(), ErrorKind::UnknownTool);
        let err = r.resolve("a", json!({"x": 1})).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        assert_eq!(err.field(), Some("x"));
    }

    #[test]
    fn timeout_precedence() {
        let cfg = ToolsConfig {
            timeouts: [("b".to_string(), 5)].into_iter().collect(),
            ..ToolsConfig::default()
        };
        let r = ToolRegistry::from_config(&cfg);
        let a = descriptor("a", Duration::ZERO).with_timeout(Duration::from_secs(90));
        let b = descriptor("b", Duration::ZERO).with_timeout(Duration::from_secs(90));
        let c = descriptor("c", Duration::ZERO);
        assert_eq!(r.timeout_for(&a), Duration::from_secs(90));
        assert_eq!(r.timeout_for(&b), Duration::from_secs(5));
        assert_eq!(r.timeout_for(&c), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let mut r = ToolRegistry::new(Duration::from_secs(30));
        r.register(descriptor("slow", Duration::from_secs(31))).unwrap();
        let resolved = r.resolve("slow", json!({})).unwrap();
        let err = r
            .invoke(resolved, invocation(CancellationToken::new()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_the_handler() {
        let mut r = ToolRegistry::new(Duration::from_secs(30));
        r.register(descriptor("slow", Duration::from_secs(20))).unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let resolved = r.resolve("slow", json!({"x": "y"})).unwrap();
        let err = r.invoke(resolved, invocation(cancel)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn fast_handler_returns_validated_arguments() {
        let mut r = ToolRegistry::new(Duration::from_secs(30));
        r.register(descriptor("fast", Duration::ZERO)).unwrap();
        let resolved = r.resolve("fast", json!({"x": "y"})).unwrap();
        let out = r
            .invoke(resolved, invocation(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out, json!({"x": "y"}));
    }
}
