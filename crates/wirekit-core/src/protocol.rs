//! JSON-RPC 2.0 message envelope.
//!
//! Every message exchanged by a wirekit session is one of three shapes:
//!
//! - **Request**: a method call carrying an `id`, answered by exactly one Response
//! - **Response**: the answer to a Request, holding either `result` or `error`
//! - **Notification**: a one-way message with no `id`, never answered
//!
//! Decoding classifies a JSON object by which fields are present rather than
//! trying each variant in turn, so an envelope that is missing required
//! fields (or carries both `result` and `error`) is rejected with an
//! [`EnvelopeError`] instead of being coerced into the wrong variant.
//!
//! # Example
//!
//! ```rust
//! use wirekit_core::protocol::{Message, Request, RequestId};
//!
//! let request = Request::with_params("echo", 1, serde_json::json!({"text": "hi"}));
//! let line = Message::from(request).encode().unwrap();
//!
//! let decoded = Message::decode(line.as_bytes()).unwrap();
//! assert_eq!(decoded.id(), Some(&RequestId::Number(1)));
//! ```

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::JsonRpcError;

/// The JSON-RPC version string. Always "2.0".
pub const JSONRPC_VERSION: &str = "2.0";

/// Key under `params._meta` that carries a progress token.
pub const PROGRESS_TOKEN_KEY: &str = "progressToken";

/// Key under `params` that holds request metadata.
pub const META_KEY: &str = "_meta";

/// A JSON-RPC request ID.
///
/// Ids are unique among the outstanding requests of one sender and are never
/// reused while the original request is unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        Self::Number(i64::from(id))
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl TryFrom<Value> for RequestId {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .ok_or_else(|| EnvelopeError::InvalidId(n.to_string())),
            Value::String(s) => Ok(Self::String(s)),
            other => Err(EnvelopeError::InvalidId(other.to_string())),
        }
    }
}

/// An opaque token correlating progress notifications with a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressToken {
    /// Integer token.
    Number(i64),
    /// String token.
    String(String),
}

impl fmt::Display for ProgressToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<&RequestId> for ProgressToken {
    fn from(id: &RequestId) -> Self {
        match id {
            RequestId::Number(n) => Self::Number(*n),
            RequestId::String(s) => Self::String(s.clone()),
        }
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The JSON-RPC version. "2.0" for every well-formed request.
    pub jsonrpc: Cow<'static, str>,
    /// The request ID for correlation.
    pub id: RequestId,
    /// The method to invoke.
    pub method: Cow<'static, str>,
    /// The method parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    /// Create a new request with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            method: method.into(),
            params: None,
        }
    }

    /// Create a new request with parameters.
    #[must_use]
    pub fn with_params(
        method: impl Into<Cow<'static, str>>,
        id: impl Into<RequestId>,
        params: Value,
    ) -> Self {
        Self {
            params: Some(params),
            ..Self::new(method, id)
        }
    }

    /// Get the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Whether the version tag is the supported "2.0".
    #[must_use]
    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }

    /// Read `params._meta.progressToken`, if the caller attached one.
    #[must_use]
    pub fn progress_token(&self) -> Option<ProgressToken> {
        let token = self.params.as_ref()?.get(META_KEY)?.get(PROGRESS_TOKEN_KEY)?;
        serde_json::from_value(token.clone()).ok()
    }

    /// Attach a progress token under `params._meta`.
    ///
    /// Positional (array) params have nowhere to carry metadata, so the token
    /// is not attached and `false` is returned.
    pub fn set_progress_token(&mut self, token: &ProgressToken) -> bool {
        let params = self.params.get_or_insert_with(|| Value::Object(Map::new()));
        if params.is_null() {
            *params = Value::Object(Map::new());
        }
        let Some(fields) = params.as_object_mut() else {
            return false;
        };
        let meta = fields
            .entry(META_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        if !meta.is_object() {
            *meta = Value::Object(Map::new());
        }
        if let Some(meta) = meta.as_object_mut() {
            meta.insert(
                PROGRESS_TOKEN_KEY.to_string(),
                serde_json::to_value(token).unwrap_or(Value::Null),
            );
        }
        true
    }
}

/// A JSON-RPC 2.0 response message.
///
/// Exactly one of `result` and `error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The JSON-RPC version.
    pub jsonrpc: Cow<'static, str>,
    /// The request ID this response corresponds to.
    pub id: RequestId,
    /// The result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl Response {
    /// Create a successful response.
    #[must_use]
    pub fn success(id: impl Into<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(id: impl Into<RequestId>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Check if this response indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_some() && self.error.is_none()
    }

    /// Check if this response indicates an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Convert into a `Result`, consuming the response.
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// A JSON-RPC 2.0 notification (a request without an id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The JSON-RPC version.
    pub jsonrpc: Cow<'static, str>,
    /// The notification method.
    pub method: Cow<'static, str>,
    /// The notification parameters, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    /// Create a new notification with no parameters.
    #[must_use]
    pub fn new(method: impl Into<Cow<'static, str>>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(JSONRPC_VERSION),
            method: method.into(),
            params: None,
        }
    }

    /// Create a new notification with parameters.
    #[must_use]
    pub fn with_params(method: impl Into<Cow<'static, str>>, params: Value) -> Self {
        Self {
            params: Some(params),
            ..Self::new(method)
        }
    }

    /// Get the method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }
}

/// Reasons an envelope cannot be decoded.
///
/// All of these are framing faults: the bytes on the wire do not describe
/// any message, so there is no request to answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The bytes are not valid JSON.
    #[error("invalid JSON: {0}")]
    Syntax(String),
    /// The JSON value is not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// The `jsonrpc` field is missing or not a string.
    #[error("missing or non-string `jsonrpc` field")]
    MissingVersion,
    /// The `id` field is null, fractional or of the wrong type.
    #[error("invalid request id: {0}")]
    InvalidId(String),
    /// The `method` field is not a string.
    #[error("`method` must be a string")]
    InvalidMethod,
    /// A response carries neither `result` nor `error`.
    #[error("response has neither `result` nor `error`")]
    MissingOutcome,
    /// A response carries both `result` and `error`.
    #[error("response has both `result` and `error`")]
    ConflictingOutcome,
    /// The `error` member is not a valid error object.
    #[error("malformed error object: {0}")]
    InvalidError(String),
    /// The object has neither `method` nor `id`.
    #[error("message has neither `method` nor `id`")]
    Unclassifiable,
    /// A batch array with no members.
    #[error("empty batch")]
    EmptyBatch,
}

/// Any JSON-RPC message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request message.
    Request(Request),
    /// A response message.
    Response(Response),
    /// A notification message.
    Notification(Notification),
}

impl Message {
    /// Decode a single message from raw bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Syntax(e.to_string()))?;
        Self::try_from(value)
    }

    /// Decode either a single message or a non-empty array of messages.
    pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Self>, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Syntax(e.to_string()))?;
        match value {
            Value::Array(items) if items.is_empty() => Err(EnvelopeError::EmptyBatch),
            Value::Array(items) => items.into_iter().map(Self::try_from).collect(),
            single => Ok(vec![Self::try_from(single)?]),
        }
    }

    /// Encode to a compact JSON string (no embedded newlines).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Get the method name if this is a request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(r) => Some(&r.method),
            Self::Notification(n) => Some(&n.method),
            Self::Response(_) => None,
        }
    }

    /// Get the request ID if this is a request or response.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(r) => Some(&r.id),
            Self::Response(r) => Some(&r.id),
            Self::Notification(_) => None,
        }
    }

    /// Check if this is a request.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Check if this is a response.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Check if this is a notification.
    #[must_use]
    pub const fn is_notification(&self) -> bool {
        matches!(self, Self::Notification(_))
    }

    /// Get as a request, if applicable.
    #[must_use]
    pub const fn as_request(&self) -> Option<&Request> {
        match self {
            Self::Request(r) => Some(r),
            _ => None,
        }
    }

    /// Get as a response, if applicable.
    #[must_use]
    pub const fn as_response(&self) -> Option<&Response> {
        match self {
            Self::Response(r) => Some(r),
            _ => None,
        }
    }

    /// Get as a notification, if applicable.
    #[must_use]
    pub const fn as_notification(&self) -> Option<&Notification> {
        match self {
            Self::Notification(n) => Some(n),
            _ => None,
        }
    }
}

impl TryFrom<Value> for Message {
    type Error = EnvelopeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut fields) = value else {
            return Err(EnvelopeError::NotAnObject);
        };

        let jsonrpc = match fields.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => Cow::Borrowed(JSONRPC_VERSION),
            Some(Value::String(v)) => Cow::Owned(v),
            _ => return Err(EnvelopeError::MissingVersion),
        };
        let id = fields.remove("id").map(RequestId::try_from).transpose()?;
        let method = match fields.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(_) => return Err(EnvelopeError::InvalidMethod),
        };
        let params = fields.remove("params");

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request(Request {
                jsonrpc,
                id,
                method: Cow::Owned(method),
                params,
            })),
            (Some(method), None) => Ok(Self::Notification(Notification {
                jsonrpc,
                method: Cow::Owned(method),
                params,
            })),
            (None, Some(id)) => {
                let result = fields.remove("result");
                let error = fields
                    .remove("error")
                    .map(|e| {
                        serde_json::from_value::<JsonRpcError>(e)
                            .map_err(|e| EnvelopeError::InvalidError(e.to_string()))
                    })
                    .transpose()?;
                match (result, error) {
                    (Some(_), Some(_)) => Err(EnvelopeError::ConflictingOutcome),
                    (None, None) => Err(EnvelopeError::MissingOutcome),
                    (result, error) => Ok(Self::Response(Response {
                        jsonrpc,
                        id,
                        result,
                        error,
                    })),
                }
            }
            (None, None) => Err(EnvelopeError::Unclassifiable),
        }
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::try_from(value).map_err(serde::de::Error::custom)
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Self::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Self::Response(r)
    }
}

impl From<Notification> for Message {
    fn from(n: Notification) -> Self {
        Self::Notification(n)
    }
}
