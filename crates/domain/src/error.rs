use serde::{Deserialize, Serialize};

/// Stable, machine-readable error category.
///
/// This is the `kind` field clients see on every error frame, so variants
/// are only ever added, never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthRequired,
    AuthHandshakeFailed,
    ValidationError,
    UpstreamUnavailable,
    UpstreamRejected,
    Timeout,
    TransportError,
    UnknownTool,
    MethodNotFound,
    Cancelled,
    Unavailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthRequired => "auth_required",
            Self::AuthHandshakeFailed => "auth_handshake_failed",
            Self::ValidationError => "validation_error",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamRejected => "upstream_rejected",
            Self::Timeout => "timeout",
            Self::TransportError => "transport_error",
            Self::UnknownTool => "unknown_tool",
            Self::MethodNotFound => "method_not_found",
            Self::Cancelled => "cancelled",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared error type used across all hamcp crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No usable session token. Carries the authorization URL when a
    /// handshake has been started for the caller.
    #[error("authentication required: {message}")]
    AuthRequired {
        message: String,
        authorization_url: Option<String>,
    },

    #[error("auth handshake failed: {0}")]
    AuthHandshakeFailed(String),

    #[error("invalid parameter `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rejected request (HTTP {status}): {message}")]
    UpstreamRejected { status: u16, message: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn auth_required(message: impl Into<String>) -> Self {
        Self::AuthRequired {
            message: message.into(),
            authorization_url: None,
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthRequired { .. } => ErrorKind::AuthRequired,
            Self::AuthHandshakeFailed(_) => ErrorKind::AuthHandshakeFailed,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::UnknownTool(_) => ErrorKind::UnknownTool,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// The offending parameter, for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Message safe to hand to a client.
    ///
    /// Internal failures are collapsed to a generic string so file paths and
    /// parser internals stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            Self::AuthRequired { message, .. } => message.clone(),
            Self::Validation { message, .. } => message.clone(),
            Self::UpstreamRejected { message, .. } => message.clone(),
            Self::Io(_) | Self::Json(_) | Self::Config(_) | Self::Other(_) => {
                "internal error".into()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
