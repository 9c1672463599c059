//! In-flight request tables.
//!
//! Outgoing entries hold the caller's reply slot; incoming entries hold the
//! handler's cancellation token. Both are keyed by request id and safe to
//! touch from the receive loop, caller tasks and handler tasks at once.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wirekit_core::error::RpcError;
use wirekit_core::protocol::{ProgressToken, RequestId, Response};
use wirekit_core::types::ProgressParams;

/// Progress updates for one outgoing request.
pub type ProgressSink = mpsc::UnboundedSender<ProgressParams>;

pub(crate) type Reply = oneshot::Sender<Result<Value, RpcError>>;

pub(crate) struct Pending {
    pub(crate) method: String,
    pub(crate) reply: Reply,
    pub(crate) progress: Option<ProgressToken>,
}

#[derive(Default)]
pub(crate) struct InFlight {
    outgoing: DashMap<RequestId, Pending>,
    incoming: DashMap<RequestId, CancellationToken>,
    progress: DashMap<ProgressToken, ProgressSink>,
    changed: Notify,
}

impl InFlight {
    pub(crate) fn register(&self, id: RequestId, pending: Pending) {
        self.outgoing.insert(id, pending);
    }

    pub(crate) fn route_progress_to(&self, token: ProgressToken, sink: ProgressSink) {
        self.progress.insert(token, sink);
    }

    /// Hand a Response to its waiter. Returns the method it answered, or
    /// `None` when no request with that id is outstanding.
    pub(crate) fn resolve(&self, response: Response) -> Option<String> {
        let (_, pending) = self.outgoing.remove(&response.id)?;
        self.forget_progress(pending.progress.as_ref());
        self.changed.notify_waiters();

        let outcome = response.into_result().map_err(RpcError::from);
        // The caller may have stopped waiting already.
        let _ = pending.reply.send(outcome);
        Some(pending.method)
    }

    /// Drop an outgoing entry without answering it. Returns whether it was
    /// still outstanding.
    pub(crate) fn abandon(&self, id: &RequestId) -> bool {
        let Some((_, pending)) = self.outgoing.remove(id) else {
            return false;
        };
        self.forget_progress(pending.progress.as_ref());
        self.changed.notify_waiters();
        true
    }

    /// Fail every outgoing request with `error`.
    pub(crate) fn fail_all(&self, error: impl Fn() -> RpcError) {
        let ids: Vec<RequestId> = self.outgoing.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, pending)) = self.outgoing.remove(&id) {
                let _ = pending.reply.send(Err(error()));
            }
        }
        self.progress.clear();
        self.changed.notify_waiters();
    }

    /// Start tracking an incoming request. Returns `None` when a request with
    /// the same id is still being handled.
    pub(crate) fn begin_incoming(&self, id: RequestId, parent: &CancellationToken) -> Option<CancellationToken> {
        match self.incoming.entry(id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(vacant) => {
                let token = parent.child_token();
                vacant.insert(token.clone());
                Some(token)
            }
        }
    }

    pub(crate) fn finish_incoming(&self, id: &RequestId) {
        self.incoming.remove(id);
        self.changed.notify_waiters();
    }

    /// Signal the handler serving `id`. Returns whether one was running.
    pub(crate) fn cancel_incoming(&self, id: &RequestId) -> bool {
        match self.incoming.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Deliver a progress update to the sink registered for its token.
    /// Gives the update back when nobody asked for it.
    pub(crate) fn route_progress(&self, update: ProgressParams) -> Result<(), ProgressParams> {
        let Some(sink) = self.progress.get(&update.progress_token).map(|s| s.clone()) else {
            return Err(update);
        };
        let token = update.progress_token.clone();
        if sink.send(update).is_err() {
            // The caller dropped its receiver; stop routing.
            self.progress.remove(&token);
        }
        Ok(())
    }

    pub(crate) fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    pub(crate) fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Wait until both tables are empty.
    pub(crate) async fn drained(&self) {
        loop {
            let changed = self.changed.notified();
            if self.outgoing.is_empty() && self.incoming.is_empty() {
                return;
            }
            changed.await;
        }
    }

    fn forget_progress(&self, token: Option<&ProgressToken>) {
        if let Some(token) = token {
            self.progress.remove(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wirekit_core::error::JsonRpcError;

    fn pending(method: &str) -> (Pending, oneshot::Receiver<Result<Value, RpcError>>) {
        let (reply, rx) = oneshot::channel();
        (
            Pending {
                method: method.to_string(),
                reply,
                progress: None,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_resolve_once() {
        let table = InFlight::default();
        let (entry, rx) = pending("echo");
        table.register(RequestId::Number(1), entry);

        let response = Response::success(1, json!({"ok": true}));
        assert_eq!(table.resolve(response.clone()).as_deref(), Some("echo"));
        // A second Response for the same id has nowhere to go.
        assert_eq!(table.resolve(response), None);

        assert_eq!(rx.await.ok().and_then(Result::ok), Some(json!({"ok": true})));
        assert_eq!(table.outgoing_len(), 0);
    }

    #[tokio::test]
    async fn test_error_response_becomes_remote_error() {
        let table = InFlight::default();
        let (entry, rx) = pending("missing");
        table.register(RequestId::from("a"), entry);
        table.resolve(Response::error("a", JsonRpcError::method_not_found("missing")));

        match rx.await {
            Ok(Err(RpcError::Remote(e))) => assert_eq!(e.code, -32601),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_all_and_abandon() {
        let table = InFlight::default();
        let (first, first_rx) = pending("a");
        let (second, _second_rx) = pending("b");
        table.register(RequestId::Number(1), first);
        table.register(RequestId::Number(2), second);

        assert!(table.abandon(&RequestId::Number(2)));
        assert!(!table.abandon(&RequestId::Number(2)));

        table.fail_all(|| RpcError::session_closed(None));
        assert!(matches!(first_rx.await, Ok(Err(RpcError::SessionClosed { .. }))));
        assert_eq!(table.outgoing_len(), 0);
    }

    #[test]
    fn test_duplicate_incoming_rejected() {
        let table = InFlight::default();
        let parent = CancellationToken::new();
        let token = table.begin_incoming(RequestId::Number(7), &parent);
        assert!(token.is_some());
        assert!(table.begin_incoming(RequestId::Number(7), &parent).is_none());

        assert!(table.cancel_incoming(&RequestId::Number(7)));
        assert!(token.is_some_and(|t| t.is_cancelled()));

        table.finish_incoming(&RequestId::Number(7));
        assert!(!table.cancel_incoming(&RequestId::Number(7)));
        assert_eq!(table.incoming_len(), 0);
    }

    #[test]
    fn test_progress_routing() {
        let table = InFlight::default();
        let token = ProgressToken::Number(3);
        let (sink, mut rx) = mpsc::unbounded_channel();
        table.route_progress_to(token.clone(), sink);

        let update = ProgressParams {
            progress_token: token,
            progress: 0.5,
            total: Some(1.0),
            message: None,
        };
        assert!(table.route_progress(update.clone()).is_ok());
        assert_eq!(rx.try_recv().ok(), Some(update));

        let stray = ProgressParams {
            progress_token: ProgressToken::String("other".into()),
            progress: 1.0,
            total: None,
            message: None,
        };
        assert!(table.route_progress(stray).is_err());
    }

    #[tokio::test]
    async fn test_drained_wakes_when_empty() {
        let table = std::sync::Arc::new(InFlight::default());
        let (entry, _rx) = pending("slow");
        table.register(RequestId::Number(1), entry);

        let waiter = {
            let table = std::sync::Arc::clone(&table);
            tokio::spawn(async move { table.drained().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        table.abandon(&RequestId::Number(1));
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("drain wait timed out")
            .expect("waiter panicked");
    }
}
