//! Extension points: request handlers and the notification listener.
//!
//! Method-specific behavior lives entirely behind these two traits. Both are
//! implemented for plain async closures, so most code registers closures:
//!
//! ```rust
//! use wirekit_session::{RequestContext, SessionBuilder};
//!
//! let builder = SessionBuilder::default()
//!     .handler("echo", |params, _ctx: RequestContext| async move {
//!         Ok(params.unwrap_or_default())
//!     })
//!     .on_notification(|note, _session| async move {
//!         println!("notification: {}", note.method);
//!     });
//! assert!(builder.has_handler("echo"));
//! ```

use std::future::Future;
use std::marker::PhantomData;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use wirekit_core::error::RpcError;
use wirekit_core::protocol::Notification;

use crate::context::RequestContext;
use crate::session::Session;

/// Serves one method.
///
/// The returned future runs on its own task, concurrently with the receive
/// loop and with other handlers. Its outcome becomes the single Response to
/// the request: `Ok` as `result`, `Err` as an error object.
pub trait RequestHandler: Send + Sync + 'static {
    /// Handle one request.
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> BoxFuture<'static, Result<Value, RpcError>>;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
{
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> BoxFuture<'static, Result<Value, RpcError>> {
        Box::pin(self(params, ctx))
    }
}

/// Receives every notification the engine does not consume itself.
///
/// Notifications are delivered one at a time in arrival order, on a task of
/// their own, so a slow listener delays later notifications but never
/// responses or requests.
pub trait NotificationListener: Send + Sync + 'static {
    /// Handle one notification.
    fn on_notification(&self, notification: Notification, session: Session) -> BoxFuture<'static, ()>;
}

impl<F, Fut> NotificationListener for F
where
    F: Fn(Notification, Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_notification(&self, notification: Notification, session: Session) -> BoxFuture<'static, ()> {
        Box::pin(self(notification, session))
    }
}

/// Adapts a handler over typed params and results.
///
/// Params that fail to deserialize are answered with `InvalidParams`
/// without calling the inner function.
pub struct Typed<F, P, R> {
    method: String,
    inner: F,
    _marker: PhantomData<fn(P) -> R>,
}

impl<F, P, R> Typed<F, P, R> {
    pub(crate) fn new(method: impl Into<String>, inner: F) -> Self {
        Self {
            method: method.into(),
            inner,
            _marker: PhantomData,
        }
    }
}

impl<F, Fut, P, R> RequestHandler for Typed<F, P, R>
where
    F: Fn(P, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    P: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    fn handle(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> BoxFuture<'static, Result<Value, RpcError>> {
        let parsed = serde_json::from_value::<P>(params.unwrap_or(Value::Null))
            .map_err(|e| RpcError::invalid_params_from(self.method.clone(), e));
        let call = parsed.map(|params| (self.inner)(params, ctx));
        let method = self.method.clone();
        Box::pin(async move {
            let output = call?.await?;
            serde_json::to_value(output)
                .map_err(|e| RpcError::internal_with_source(format!("unserializable result from '{method}'"), e))
        })
    }
}
