//! Well-known methods and their params.

use serde::{Deserialize, Serialize};

use crate::protocol::{Notification, ProgressToken, RequestId};

/// Method names the session engine handles itself.
pub mod method {
    /// Capability negotiation request.
    pub const INITIALIZE: &str = "initialize";
    /// Sent by the initiator once the initialize result has been processed.
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check, answered in every state.
    pub const PING: &str = "ping";
    /// Cancels an outstanding request.
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Out-of-band progress for an outstanding request.
    pub const PROGRESS: &str = "notifications/progress";
}

/// Params of `notifications/cancelled`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// The request being cancelled.
    pub request_id: RequestId,
    /// Why it was cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelledParams {
    /// Build the notification that carries these params.
    #[must_use]
    pub fn into_notification(self) -> Notification {
        Notification::with_params(
            method::CANCELLED,
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        )
    }
}

/// Params of `notifications/progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token taken from the request's `_meta.progressToken`.
    pub progress_token: ProgressToken,
    /// Progress so far; increases with every update.
    pub progress: f64,
    /// Total amount of work, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,
    /// Human-readable status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ProgressParams {
    /// Build the notification that carries these params.
    #[must_use]
    pub fn into_notification(self) -> Notification {
        Notification::with_params(
            method::PROGRESS,
            serde_json::to_value(self).unwrap_or(serde_json::Value::Null),
        )
    }
}
