//! [`UpstreamClient`]: REST access with retry and response caching.
//!
//! Reads go through the cache; writes invalidate every cache entry under
//! the resource they touch, both before they are sent and after they
//! complete. Transient failures of idempotent calls are retried with the
//! [`RetryPolicy`], never past the caller's deadline.

use std::sync::Arc;

use hamcp_domain::{Error, Result};
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::cache::{resource_root, Fingerprint, ResponseCache};
use crate::request::{UpstreamRequest, UpstreamResponse};
use crate::retry::{is_idempotent, RetryPolicy};
use crate::transport::Transport;

/// Credentials and time budget of one logical call.
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub token: &'a str,
    /// No retry is scheduled if its backoff would end after this instant.
    pub deadline: Option<Instant>,
}

impl<'a> CallContext<'a> {
    pub fn new(token: &'a str) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    cache: Option<ResponseCache>,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryPolicy, cache: Option<ResponseCache>) -> Self {
        Self {
            transport,
            retry,
            cache,
        }
    }

    pub fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Drop every cached entry under `root`.
    pub fn invalidate(&self, root: &str) {
        if let Some(cache) = &self.cache {
            let dropped = cache.invalidate_root(root);
            if dropped > 0 {
                tracing::debug!(root, dropped, "cache entries invalidated");
            }
        }
    }

    pub async fn execute(&self, request: &UpstreamRequest, cx: CallContext<'_>) -> Result<Value> {
        if request.is_read() {
            let Some(cache) = &self.cache else {
                return self.send_with_retry(request, cx).await;
            };
            let fp = Fingerprint::of(request);
            if let Some(hit) = cache.get(&fp) {
                tracing::debug!(fingerprint = %fp, "upstream cache hit");
                return Ok(hit);
            }
            let generation = cache.generation(&fp.resource_root());
            let value = self.send_with_retry(request, cx).await?;
            cache.insert(fp, value.clone(), generation);
            return Ok(value);
        }

        let roots = affected_roots(&request.path);
        for root in &roots {
            self.invalidate(root);
        }
        let result = self.send_with_retry(request, cx).await;
        for root in &roots {
            self.invalidate(root);
        }
        result
    }

    async fn send_with_retry(&self, request: &UpstreamRequest, cx: CallContext<'_>) -> Result<Value> {
        let label = request.label();
        let idempotent = is_idempotent(&request.method);
        let mut retries = 0u32;

        loop {
            let started = Instant::now();
            let outcome = self.transport.send(request, cx.token).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let failure = match outcome {
                Ok(resp) if resp.is_success() => {
                    tracing::debug!(call = %label, status = resp.status, duration_ms, "upstream call");
                    return Ok(resp.body);
                }
                Ok(resp) if resp.is_server_error() => {
                    format!("{label} returned {}: {}", resp.status, resp.error_message())
                }
                Ok(resp) => return Err(rejection(&label, &resp)),
                Err(f) if f.is_transient() => format!("{label}: {f}"),
                Err(f) => return Err(Error::UpstreamUnavailable(format!("{label}: {f}"))),
            };

            if !idempotent {
                tracing::warn!(call = %label, duration_ms, "non-idempotent upstream call failed, not retrying");
                return Err(Error::UpstreamUnavailable(failure));
            }
            if self.retry.should_give_up(retries) {
                return Err(Error::UpstreamUnavailable(format!(
                    "{failure} (gave up after {} attempts)",
                    retries + 1
                )));
            }

            let delay = self.retry.delay_for_attempt(retries);
            if let Some(deadline) = cx.deadline {
                if Instant::now() + delay >= deadline {
                    return Err(Error::UpstreamUnavailable(format!(
                        "{failure} (no time left to retry)"
                    )));
                }
            }

            tracing::warn!(
                call = %label,
                attempt = retries + 1,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "transient upstream failure, retrying"
            );
            tokio::time::sleep(delay).await;
            retries += 1;
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // REST surface
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// `GET /api/` — succeeds only for a token the controller accepts.
    pub async fn api_status(&self, cx: CallContext<'_>) -> Result<Value> {
        self.send_with_retry(&UpstreamRequest::get("/api/"), cx).await
    }

    pub async fn get_config(&self, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::get("/api/config"), cx).await
    }

    pub async fn get_states(&self, cx: CallContext<'_>) -> Result<Vec<Value>> {
        let value = self.execute(&UpstreamRequest::get("/api/states"), cx).await?;
        match value {
            Value::Array(items) => Ok(items),
            other => Err(Error::UpstreamUnavailable(format!(
                "GET /api/states returned a non-list body: {other}"
            ))),
        }
    }

    pub async fn get_state(&self, entity_id: &str, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::get(format!("/api/states/{entity_id}")), cx)
            .await
    }

    pub async fn set_state(
        &self,
        entity_id: &str,
        state: &str,
        attributes: Option<Value>,
        cx: CallContext<'_>,
    ) -> Result<Value> {
        let mut body = json!({ "state": state });
        if let Some(attrs) = attributes {
            body["attributes"] = attrs;
        }
        self.execute(&UpstreamRequest::post(format!("/api/states/{entity_id}"), body), cx)
            .await
    }

    pub async fn get_services(&self, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::get("/api/services"), cx).await
    }

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Value,
        cx: CallContext<'_>,
    ) -> Result<Value> {
        let path = format!("/api/services/{domain}/{service}");
        self.execute(&UpstreamRequest::post(path, data), cx).await
    }

    pub async fn get_events(&self, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::get("/api/events"), cx).await
    }

    pub async fn fire_event(&self, event_type: &str, data: Value, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::post(format!("/api/events/{event_type}"), data), cx)
            .await
    }

    pub async fn get_error_log(&self, cx: CallContext<'_>) -> Result<Value> {
        self.execute(&UpstreamRequest::get("/api/error_log"), cx).await
    }

    pub async fn check_config(&self, cx: CallContext<'_>) -> Result<Value> {
        let request = UpstreamRequest::new(reqwest::Method::POST, "/api/config/core/check_config");
        self.execute(&request, cx).await
    }

    pub async fn render_template(&self, template: &str, variables: Option<Value>, cx: CallContext<'_>) -> Result<Value> {
        let mut body = json!({ "template": template });
        if let Some(vars) = variables {
            body["variables"] = vars;
        }
        self.execute(&UpstreamRequest::post("/api/template", body), cx).await
    }
}

/// Cache roots a mutation of `path` can change. Service calls act on
/// entities, so they also stale the states collection.
fn affected_roots(path: &str) -> Vec<String> {
    let root = resource_root(path);
    if root == "/api/services" {
        vec![root, "/api/states".into()]
    } else {
        vec![root]
    }
}

fn rejection(label: &str, resp: &UpstreamResponse) -> Error {
    let message = resp.error_message();
    match resp.status {
        401 | 403 => Error::AuthRequired {
            message: format!("controller rejected the session token on {label}: {message}"),
            authorization_url: None,
        },
        status => Error::UpstreamRejected { status, message },
    }
}
