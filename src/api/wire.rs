// src/api/wire.rs

//! Wire envelopes for the control socket.
//!
//! Requests and responses are single JSON objects carried in
//! length-prefixed frames (see [`crate::socket::framing`]).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel result payload of a honoured `shutdown` call.
pub const SHUTDOWN_ACK: &str = "ShutdownAck";

/// A single API call as sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Wire identifier of the call (`"pause"`, `"status"`, ...).
    pub name: String,
    /// Client-chosen id echoed back in the response.
    pub request_id: String,
    /// Call-specific parameters; `{}` when a call takes none.
    #[serde(default)]
    pub payload: Value,
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

impl ApiRequest {
    /// Build a request with a process-locally unique request id.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        let n = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            name: name.into(),
            request_id: format!("req-{}-{}", std::process::id(), n),
            payload,
        }
    }
}

/// Wire-visible error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    BadRequest,
    UnknownStep,
    DuplicateId,
    WouldCycle,
    InvalidTransition,
    QueueFull,
    InternalError,
    /// Not an error: the sentinel acknowledging a shutdown request.
    ShutdownAck,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Error body carried in a failed response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ApiError {}

/// The response envelope for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub request_id: String,
    pub ok: bool,
    pub result: Option<Value>,
    pub error: Option<ApiError>,
}

impl ApiResponse {
    pub fn success(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<String>, error: ApiError) -> Self {
        Self {
            request_id: request_id.into(),
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Collapse the envelope into the result payload or the error.
    pub fn into_result(self) -> Result<Value, ApiError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(self
                .error
                .unwrap_or_else(|| ApiError::new(ErrorKind::InternalError, "missing error body")))
        }
    }
}
