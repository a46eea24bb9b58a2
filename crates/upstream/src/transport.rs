//! The HTTP seam between [`UpstreamClient`](crate::UpstreamClient) and the
//! network. Tests substitute scripted implementations.

use std::time::Duration;

use async_trait::async_trait;
use hamcp_domain::{Error, Result};
use serde_json::Value;

use crate::request::{UpstreamRequest, UpstreamResponse};

/// A failure below the HTTP status line.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportFailure {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl TransportFailure {
    /// Timeouts and connect/reset failures are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one attempt. No retries, no caching.
    async fn send(
        &self,
        request: &UpstreamRequest,
        token: &str,
    ) -> std::result::Result<UpstreamResponse, TransportFailure>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// reqwest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("building HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

fn classify(e: reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Timeout
    } else if e.is_connect() || e.is_request() || e.is_body() {
        TransportFailure::Connect(e.to_string())
    } else {
        TransportFailure::Other(e.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: &UpstreamRequest,
        token: &str,
    ) -> std::result::Result<UpstreamResponse, TransportFailure> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut rb = self
            .http
            .request(request.method.clone(), &url)
            .bearer_auth(token);
        if !request.query.is_empty() {
            rb = rb.query(&request.query);
        }
        if let Some(body) = &request.body {
            rb = rb.json(body);
        }

        let resp = rb.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(classify)?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        Ok(UpstreamResponse { status, body })
    }
}
