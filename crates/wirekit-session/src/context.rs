//! Per-request context handed to handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wirekit_core::error::RpcError;
use wirekit_core::protocol::{ProgressToken, RequestId};
use wirekit_core::types::ProgressParams;

use crate::session::Session;

const NO_PROGRESS: u64 = u64::MAX;

/// What a handler knows about the request it serves.
///
/// Cancellation is cooperative: when the peer cancels the request the token
/// fires, and the handler decides when to look. A handler that never checks
/// runs to completion; its result is then replaced by a cancellation error.
#[derive(Clone)]
pub struct RequestContext {
    request_id: RequestId,
    method: Arc<str>,
    progress_token: Option<ProgressToken>,
    cancel: CancellationToken,
    last_progress: Arc<AtomicU64>,
    session: Session,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("progress_token", &self.progress_token)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub(crate) fn new(
        request_id: RequestId,
        method: Arc<str>,
        progress_token: Option<ProgressToken>,
        cancel: CancellationToken,
        session: Session,
    ) -> Self {
        Self {
            request_id,
            method,
            progress_token,
            cancel,
            last_progress: Arc::new(AtomicU64::new(NO_PROGRESS)),
            session,
        }
    }

    /// The id of the request being served.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// The method being served.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The progress token the caller attached, if any.
    #[must_use]
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Whether the peer has cancelled this request.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the peer cancels this request or the session ends.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// A clone of the cancellation token, for passing into child work.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The session the request arrived on.
    ///
    /// Handlers may use it to call back into the peer while serving.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Report progress to the caller.
    ///
    /// A no-op when the caller did not ask for progress. Progress must grow
    /// with each update; a value that does not is dropped.
    pub async fn progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<(), RpcError> {
        let Some(token) = &self.progress_token else {
            return Ok(());
        };

        // Non-negative finite floats order the same as their bit patterns.
        let bits = progress.to_bits();
        let accepted = progress.is_finite()
            && !progress.is_sign_negative()
            && self
                .last_progress
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                    (last == NO_PROGRESS || bits > last).then_some(bits)
                })
                .is_ok();
        if !accepted {
            tracing::debug!(
                request_id = %self.request_id,
                progress,
                "dropping non-increasing progress update"
            );
            return Ok(());
        }

        let update = ProgressParams {
            progress_token: token.clone(),
            progress,
            total,
            message,
        };
        self.session
            .send_raw(update.into_notification().into())
            .await
    }

    /// Send a notification to the peer.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.session.send_notification(method, params).await
    }
}
