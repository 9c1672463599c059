//! The tasks behind a session: one writer, one reader, an optional
//! notification listener, and one task per incoming request.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wirekit_core::capability::{InitializeParams, InitializeResult, Negotiated, negotiate_version};
use wirekit_core::error::{JsonRpcError, RpcError};
use wirekit_core::protocol::{Message, Notification, ProgressToken, Request, RequestId, Response};
use wirekit_core::state::SessionState;
use wirekit_core::types::{CancelledParams, ProgressParams, method};
use wirekit_transport::Transport;

use crate::context::RequestContext;
use crate::handler::{NotificationListener, RequestHandler};
use crate::session::{Inner, Role, Session};

/// Drain the outbound queue into the transport.
///
/// On shutdown whatever is already queued is flushed, bounded by the close
/// timeout, before the transport is closed.
pub(crate) fn spawn_writer<T>(inner: Arc<Inner>, transport: Arc<T>, mut rx: mpsc::Receiver<Message>)
where
    T: Transport + 'static,
    RpcError: From<T::Error>,
{
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                biased;
                msg = rx.recv() => msg,
                () = inner.shutdown.cancelled() => break,
            };
            let Some(msg) = msg else { break };
            if let Err(e) = transport.send(msg).await {
                let e = RpcError::from(e).with_transport_context(inner.transport_context());
                tracing::warn!(session = %inner.label, error = %e, "failed to send message");
                inner.fail("send failed", &e);
                break;
            }
        }

        let flush = async {
            while let Ok(msg) = rx.try_recv() {
                if transport.send(msg).await.is_err() {
                    break;
                }
            }
        };
        if tokio::time::timeout(inner.config.close_timeout, flush).await.is_err() {
            tracing::debug!(session = %inner.label, "gave up flushing queued messages");
        }
        if let Err(e) = transport.close().await {
            let e = RpcError::from(e);
            tracing::debug!(session = %inner.label, error = %e, "error closing transport");
        }
        inner.finished.cancel();
    });
}

/// Read messages until the peer goes away or the session shuts down.
pub(crate) fn spawn_reader<T>(session: Session, transport: Arc<T>)
where
    T: Transport + 'static,
    RpcError: From<T::Error>,
{
    tokio::spawn(async move {
        let inner = Arc::clone(&session.inner);
        loop {
            let received = tokio::select! {
                () = inner.shutdown.cancelled() => break,
                received = transport.recv() => received,
            };
            match received {
                Ok(Some(msg)) => dispatch(&session, msg).await,
                Ok(None) => {
                    inner.teardown("peer closed the connection");
                    break;
                }
                Err(e) => {
                    let e = RpcError::from(e).with_transport_context(inner.transport_context());
                    if matches!(e, RpcError::Parse { .. }) {
                        tracing::error!(session = %inner.label, error = %e, "framing error, closing session");
                    } else {
                        tracing::warn!(session = %inner.label, error = %e, "transport failed, closing session");
                    }
                    inner.fail("transport error", &e);
                    break;
                }
            }
        }
    });
}

/// Hand notifications to the listener one at a time, in arrival order.
pub(crate) fn spawn_listener(
    session: Session,
    listener: Arc<dyn NotificationListener>,
    mut rx: mpsc::UnboundedReceiver<Notification>,
) {
    let shutdown = session.inner.shutdown.clone();
    tokio::spawn(async move {
        loop {
            let note = tokio::select! {
                biased;
                note = rx.recv() => note,
                () = shutdown.cancelled() => break,
            };
            let Some(note) = note else { break };
            listener.on_notification(note, session.clone()).await;
        }
    });
}

async fn dispatch(session: &Session, msg: Message) {
    match msg {
        Message::Request(request) => on_request(session, request).await,
        Message::Response(response) => on_response(&session.inner, response),
        Message::Notification(note) => on_notification(&session.inner, note),
    }
}

fn on_response(inner: &Inner, response: Response) {
    let id = response.id.clone();
    match inner.inflight.resolve(response) {
        Some(method) => {
            tracing::trace!(session = %inner.label, request_id = %id, method = %method, "response matched");
        }
        None => {
            tracing::warn!(session = %inner.label, request_id = %id, "discarding response with unknown or finished id");
        }
    }
}

fn on_notification(inner: &Inner, note: Notification) {
    match note.method() {
        method::CANCELLED => {
            match serde_json::from_value::<CancelledParams>(note.params.unwrap_or(Value::Null)) {
                Ok(params) => {
                    let running = inner.inflight.cancel_incoming(&params.request_id);
                    tracing::debug!(
                        session = %inner.label,
                        request_id = %params.request_id,
                        reason = params.reason.as_deref().unwrap_or(""),
                        running,
                        "peer cancelled request"
                    );
                }
                Err(e) => {
                    tracing::debug!(session = %inner.label, error = %e, "ignoring malformed cancellation");
                }
            }
        }
        method::PROGRESS => {
            let update = note
                .params
                .clone()
                .map(serde_json::from_value::<ProgressParams>);
            match update {
                Some(Ok(update)) => {
                    if inner.inflight.route_progress(update).is_ok() {
                        return;
                    }
                }
                _ => tracing::debug!(session = %inner.label, "malformed progress notification"),
            }
            deliver(inner, note);
        }
        method::INITIALIZED => {
            if inner.role == Role::Server && inner.state() == SessionState::Initializing {
                inner.transition(SessionState::Active);
                tracing::info!(session = %inner.label, "session initialized");
            } else {
                tracing::debug!(session = %inner.label, state = %inner.state(), "ignoring unexpected initialized notification");
            }
        }
        _ => deliver(inner, note),
    }
}

fn deliver(inner: &Inner, note: Notification) {
    match &inner.notifications {
        Some(tx) => {
            let _ = tx.send(note);
        }
        None => {
            tracing::trace!(session = %inner.label, method = note.method(), "no listener for notification");
        }
    }
}

async fn respond(inner: &Inner, response: Response) {
    let id = response.id.clone();
    if let Err(e) = inner.enqueue(response.into()).await {
        tracing::debug!(session = %inner.label, request_id = %id, error = %e, "dropping response");
    }
}

async fn reject(inner: &Inner, id: RequestId, error: &RpcError) {
    respond(inner, Response::error(id, JsonRpcError::from(error))).await;
}

async fn on_request(session: &Session, request: Request) {
    let inner = &session.inner;
    if !request.has_valid_version() {
        reject(inner, request.id, &RpcError::invalid_request("unsupported jsonrpc version")).await;
        return;
    }

    let state = inner.state();
    match request.method() {
        method::PING if !state.is_closed() => {
            respond(inner, Response::success(request.id, Value::Object(serde_json::Map::new()))).await;
            return;
        }
        method::INITIALIZE => {
            on_initialize(inner, request).await;
            return;
        }
        _ => {}
    }

    match state {
        SessionState::Active => {}
        SessionState::Closing => {
            reject(inner, request.id, &RpcError::session_closed(Some("session is closing".into()))).await;
            return;
        }
        SessionState::Closed => return,
        SessionState::Uninitialized | SessionState::Initializing => {
            let error = RpcError::invalid_request(format!(
                "cannot serve '{}' before the session is initialized",
                request.method()
            ));
            reject(inner, request.id, &error).await;
            return;
        }
    }

    let Some(handler) = inner.handlers.get(request.method()).cloned() else {
        tracing::debug!(session = %inner.label, method = request.method(), "no handler registered");
        let error = RpcError::method_not_found(request.method());
        reject(inner, request.id, &error).await;
        return;
    };

    // The original request keeps running and still gets its own response.
    let Some(token) = inner.inflight.begin_incoming(request.id.clone(), &inner.shutdown) else {
        tracing::warn!(session = %inner.label, request_id = %request.id, "rejecting request reusing an in-flight id");
        let error = RpcError::invalid_request(format!("request id {} is already in flight", request.id));
        reject(inner, request.id, &error).await;
        return;
    };

    let progress_token = request.progress_token();
    let Request { id, method, params, .. } = request;
    let method: Arc<str> = Arc::from(method.as_ref());
    let session = session.clone();
    inner.handler_tasks.spawn(async move {
        let response = serve(&session, handler, &id, method, params, progress_token, &token).await;
        let inner = &session.inner;
        respond(inner, response).await;
        inner.inflight.finish_incoming(&id);
    });
}

async fn serve(
    session: &Session,
    handler: Arc<dyn RequestHandler>,
    id: &RequestId,
    method: Arc<str>,
    params: Option<Value>,
    progress_token: Option<ProgressToken>,
    token: &CancellationToken,
) -> Response {
    let inner = &session.inner;
    let permit = tokio::select! {
        biased;
        () = token.cancelled() => None,
        permit = Arc::clone(&inner.handler_slots).acquire_owned() => permit.ok(),
    };

    let result = match permit {
        None => Err(RpcError::cancelled(&*method)),
        Some(_permit) => {
            let ctx = RequestContext::new(
                id.clone(),
                Arc::clone(&method),
                progress_token,
                token.clone(),
                session.clone(),
            );
            match AssertUnwindSafe(handler.handle(params, ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(ToString::to_string)
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_default();
                    tracing::error!(session = %inner.label, request_id = %id, method = %method, panic = %detail, "handler panicked");
                    Err(RpcError::internal(format!("handler for '{method}' panicked")))
                }
            }
        }
    };

    if token.is_cancelled() {
        return Response::error(
            id.clone(),
            JsonRpcError::request_cancelled(format!("request '{method}' was cancelled")),
        );
    }
    match result {
        Ok(value) => Response::success(id.clone(), value),
        Err(e) => Response::error(id.clone(), JsonRpcError::from(&e)),
    }
}

async fn on_initialize(inner: &Inner, request: Request) {
    if inner.role != Role::Server {
        reject(inner, request.id, &RpcError::invalid_request("clients do not accept initialize")).await;
        return;
    }
    if inner.state() != SessionState::Uninitialized {
        reject(inner, request.id, &RpcError::invalid_request("session is already initialized")).await;
        return;
    }

    let params: InitializeParams =
        match serde_json::from_value(request.params.unwrap_or(Value::Null)) {
            Ok(params) => params,
            Err(e) => {
                reject(inner, request.id, &RpcError::invalid_params_from(method::INITIALIZE, e)).await;
                return;
            }
        };

    let version = negotiate_version(&params.protocol_version);
    if version != params.protocol_version {
        tracing::debug!(
            session = %inner.label,
            requested = %params.protocol_version,
            offered = version,
            "counter-offering protocol version"
        );
    }

    let config = &inner.config;
    let result = InitializeResult {
        protocol_version: version.to_string(),
        capabilities: config.capabilities.clone(),
        server_info: config.info.clone(),
        instructions: config.instructions.clone(),
    };
    let result = match serde_json::to_value(&result) {
        Ok(result) => result,
        Err(e) => {
            let error = RpcError::internal_with_source("failed to encode initialize result", e);
            reject(inner, request.id, &error).await;
            return;
        }
    };

    inner.transition(SessionState::Initializing);
    tracing::info!(
        session = %inner.label,
        client = %params.client_info.name,
        protocol_version = version,
        "initialize accepted"
    );
    let _ = inner.negotiated.set(Negotiated {
        protocol_version: version.to_string(),
        peer_info: Some(params.client_info),
        peer_capabilities: params.capabilities,
    });
    respond(inner, Response::success(request.id, result)).await;
}
