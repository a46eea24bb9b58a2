//! Protocol frames.
//!
//! Every message is a single JSON object tagged by `type`:
//!
//! ```json
//! {"type":"request","id":7,"method":"tools/call","params":{...}}
//! {"type":"response","id":7,"result":{...}}
//! {"type":"notification","method":"tools/progress","params":{...}}
//! {"type":"error","id":7,"error":{"kind":"timeout","message":"..."}}
//! ```

use hamcp_domain::{Error, ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request ids
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Client-chosen request identifier: a JSON integer or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Notification,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Request {
        id: RequestId,
        method: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    Notification {
        method: String,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        params: Value,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        error: ErrorBody,
    },
}

/// Error payload: a stable `kind`, a human-readable message, and for
/// validation failures the offending `field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let data = match err {
            Error::AuthRequired {
                authorization_url: Some(url),
                ..
            } => Some(serde_json::json!({ "authorization_url": url })),
            Error::UpstreamRejected { status, .. } => Some(serde_json::json!({ "status": status })),
            _ => None,
        };
        Self {
            kind: err.kind(),
            message: err.client_message(),
            field: err.field().map(str::to_owned),
            data,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        Error::validation("frame", err.to_string())
    }
}

impl Frame {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: id.into(),
            method: method.into(),
            params,
        }
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Self::Response { id, result }
    }

    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    pub fn error(id: Option<RequestId>, err: &Error) -> Self {
        Self::Error {
            id,
            error: ErrorBody::from(err),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Notification { .. } => MessageKind::Notification,
            Self::Error { .. } => MessageKind::Error,
        }
    }

    /// Originating request id; `None` for notifications and id-less errors.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Error { id, .. } => id.as_ref(),
            Self::Notification { .. } => None,
        }
    }

    /// Serialize to a single line of JSON.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, FrameError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FrameError::Empty);
        }
        Ok(serde_json::from_str(raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_request_with_numeric_id() {
        let frame = Frame::decode(r#"{"type":"request","id":3,"method":"tools/list"}"#).unwrap();
        assert_eq!(frame.kind(), MessageKind::Request);
        assert_eq!(frame.id(), Some(&RequestId::Number(3)));
        match frame {
            Frame::Request { method, params, .. } => {
                assert_eq!(method, "tools/list");
                assert!(params.is_null());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn decode_request_with_string_id() {
        let frame =
            Frame::decode(r#"{"type":"request","id":"abc","method":"ping","params":{}}"#).unwrap();
        assert_eq!(frame.id(), Some(&RequestId::Text("abc".into())));
    }

    #[test]
    fn notification_has_no_id_on_the_wire() {
        let encoded = Frame::notification("tools/progress", json!({"pct": 50}))
            .encode()
            .unwrap();
        assert!(encoded.contains("\"type\":\"notification\""));
        assert!(!encoded.contains("\"id\""));
        assert!(!encoded.contains('\n'));
    }

    #[test]
    fn error_frame_carries_kind_field_and_auth_url() {
        let err = Error::AuthRequired {
            message: "sign in".into(),
            authorization_url: Some("http://ha/auth/authorize?state=x".into()),
        };
        let frame = Frame::error(Some(RequestId::Number(9)), &err);
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["error"]["kind"], "auth_required");
        assert_eq!(
            value["error"]["data"]["authorization_url"],
            "http://ha/auth/authorize?state=x"
        );

        let invalid = Frame::error(None, &Error::validation("operation", "unknown operation"));
        let value: Value = serde_json::from_str(&invalid.encode().unwrap()).unwrap();
        assert_eq!(value["error"]["kind"], "validation_error");
        assert_eq!(value["error"]["field"], "operation");
        assert!(value.get("id").is_none());
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(matches!(Frame::decode("   "), Err(FrameError::Empty)));
        assert!(matches!(
            Frame::decode(r#"{"type":"shout","id":1}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            Frame::decode(r#"{"type":"request","method":"ping"}"#),
            Err(FrameError::Malformed(_))
        ));
    }
}
