//! The JSON-RPC error object and conversions from `RpcError`.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::codes;
use super::types::RpcError;

/// A JSON-RPC error object as carried in an error Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl JsonRpcError {
    /// Create an error with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured data.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Create an "invalid params" error (-32602).
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Create an "internal error" (-32603).
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }

    /// Create a "method not found" error (-32601).
    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, message)
    }

    /// Create a "parse error" (-32700).
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(codes::PARSE_ERROR, message)
    }

    /// Create an "invalid request" error (-32600).
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, message)
    }

    /// Create a "request cancelled" error.
    pub fn request_cancelled(message: impl Into<String>) -> Self {
        Self::new(codes::REQUEST_CANCELLED, message)
    }
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl From<&RpcError> for JsonRpcError {
    fn from(err: &RpcError) -> Self {
        if let RpcError::Remote(remote) = err {
            return remote.as_ref().clone();
        }

        let code = err.code();
        let message = err.to_string();
        let data = match err {
            RpcError::MethodNotFound { method } => Some(serde_json::json!({ "method": method })),
            RpcError::InvalidParams(details) => Some(serde_json::json!({
                "method": details.method,
            })),
            RpcError::Transport(details) => Some(serde_json::json!({
                "kind": details.kind,
                "context": details.context,
            })),
            RpcError::HandshakeFailed(details) => Some(serde_json::json!({
                "local_version": details.local_version,
                "peer_version": details.peer_version,
            })),
            RpcError::Cancelled { method, reason } => Some(serde_json::json!({
                "method": method,
                "reason": reason,
            })),
            RpcError::ReplayExpired { stream_id, after } => Some(serde_json::json!({
                "stream_id": stream_id,
                "after": after,
            })),
            RpcError::WithContext { source, .. } => {
                let inner: Self = source.as_ref().into();
                inner.data
            }
            _ => None,
        };

        Self {
            code,
            message,
            data,
        }
    }
}

impl From<RpcError> for JsonRpcError {
    fn from(err: RpcError) -> Self {
        Self::from(&err)
    }
}
