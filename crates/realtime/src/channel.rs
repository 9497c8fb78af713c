//! Per-channel handle.
//!
//! A [`ChannelHandle`] is the caller-facing side of one logical channel.
//! Handles are cheap to clone; every clone addresses the same underlying
//! connection, so a repeated acquire from the manager hands back the live
//! channel rather than a second stream.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::connection::{
    self, ConnCmd, ConnectionConfig, ConnectionShared, ConnectionState, UrlProducer,
};
use crate::error::Result;
use crate::event::EventCallback;
use crate::handlers::{
    ChannelHandlers, OnCloseCallback, OnErrorCallback, OnMessageCallback, OnOpenCallback,
};
use crate::transport::Transport;

/// Handle to one logical realtime channel.
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<ConnectionShared>,
    unregister: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ChannelHandle {
    /// Opens a standalone channel outside any manager.
    pub fn connect(
        key: impl Into<String>,
        url: impl Fn() -> String + Send + Sync + 'static,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
        callback: Option<EventCallback>,
        handlers: ChannelHandlers,
    ) -> Self {
        let url: UrlProducer = Arc::new(url);
        let shared = connection::spawn(key.into(), url, transport, config, callback, handlers);
        Self {
            shared,
            unregister: None,
        }
    }

    pub(crate) fn with_unregister(
        shared: Arc<ConnectionShared>,
        unregister: Arc<dyn Fn() + Send + Sync>,
    ) -> Self {
        Self {
            shared,
            unregister: Some(unregister),
        }
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// State of the underlying physical stream right now.
    pub fn ready_state(&self) -> ConnectionState {
        self.shared
            .state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_open(&self) -> bool {
        self.ready_state() == ConnectionState::Open
    }

    /// Queues a pre-serialized frame. Sent immediately when open, buffered
    /// while disconnected, silently dropped after [`close`](Self::close).
    pub fn send_text(&self, text: impl Into<String>) {
        if self.shared.closed.load(Ordering::SeqCst) {
            debug!(channel = %self.shared.key, "dropping send on closed channel");
            return;
        }
        let _ = self.shared.cmd_tx.send(ConnCmd::Send(text.into()));
    }

    /// Serializes `value` and queues it like [`send_text`](Self::send_text).
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send_text(text);
        Ok(())
    }

    /// Replaces the inbound event callback. Atomic: every event goes to
    /// exactly one of the old or the new callback, never both.
    pub fn bind(&self, callback: EventCallback) {
        if let Ok(mut slot) = self.shared.callback.write() {
            *slot = Some(callback);
        }
    }

    /// Convenience wrapper around [`bind`](Self::bind) for plain closures.
    pub fn on_event(&self, f: impl Fn(Value) + Send + Sync + 'static) {
        self.bind(Arc::new(f));
    }

    /// Replaces all lifecycle hooks at once.
    pub fn set_handlers(&self, handlers: ChannelHandlers) {
        if let Ok(mut slot) = self.shared.handlers.write() {
            *slot = handlers;
        }
    }

    pub fn set_on_open(&self, f: impl Fn() + Send + Sync + 'static) {
        self.set_slot(|h, cb| h.on_open = Some(cb), Arc::new(f) as OnOpenCallback);
    }

    pub fn set_on_close(
        &self,
        f: impl Fn(crate::handlers::DisconnectReason) + Send + Sync + 'static,
    ) {
        self.set_slot(|h, cb| h.on_close = Some(cb), Arc::new(f) as OnCloseCallback);
    }

    pub fn set_on_error(
        &self,
        f: impl Fn(crate::handlers::ConnectionError) + Send + Sync + 'static,
    ) {
        self.set_slot(|h, cb| h.on_error = Some(cb), Arc::new(f) as OnErrorCallback);
    }

    pub fn set_on_message(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.set_slot(|h, cb| h.on_message = Some(cb), Arc::new(f) as OnMessageCallback);
    }

    fn set_slot<C>(&self, assign: impl FnOnce(&mut ChannelHandlers, C), cb: C) {
        if let Ok(mut handlers) = self.shared.handlers.write() {
            assign(&mut handlers, cb);
        }
    }

    /// Permanently closes the channel: the stream is shut down, buffered
    /// messages are dropped, and no reconnect will ever be attempted. The
    /// owning manager forgets the channel, so a later acquire under the same
    /// key builds a fresh connection.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Ok(mut state) = self.shared.state.write() {
            *state = ConnectionState::Closed;
        }
        let _ = self.shared.cmd_tx.send(ConnCmd::Close);
        if let Some(unregister) = &self.unregister {
            unregister();
        }
    }
}

impl std::fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("key", &self.shared.key)
            .field("state", &self.ready_state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::handlers::DisconnectReason;
    use crate::transport::mock::MockTransport;

    fn connect_with(transport: Arc<MockTransport>) -> ChannelHandle {
        ChannelHandle::connect(
            "general",
            || "ws://test.invalid/ws/chat/general".to_string(),
            transport,
            ConnectionConfig::default(),
            None,
            ChannelHandlers::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ready_state_tracks_the_stream_lifecycle() {
        let (transport, mut peers) = MockTransport::new();
        let handle = connect_with(transport);
        assert_eq!(handle.ready_state(), ConnectionState::Connecting);

        let (opened_tx, mut opened_rx) = mpsc::unbounded_channel();
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        handle.set_on_open(move || {
            let _ = opened_tx.send(());
        });
        handle.set_on_close(move |_| {
            let _ = closed_tx.send(());
        });

        let peer = peers.recv().await.unwrap();
        opened_rx.recv().await.unwrap();
        assert!(handle.is_open());

        peer.push_close(DisconnectReason::new("going away"));
        closed_rx.recv().await.unwrap();
        assert_eq!(handle.ready_state(), ConnectionState::Reconnecting);

        handle.close();
        assert_eq!(handle.ready_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn send_json_serializes_structured_values() {
        let (transport, mut peers) = MockTransport::new();
        let handle = connect_with(transport);

        handle
            .send_json(&json!({"type": "chat_message", "body": "hi"}))
            .unwrap();

        let mut peer = peers.recv().await.unwrap();
        let sent = peer.sent.recv().await.unwrap();
        let decoded: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(decoded["type"], "chat_message");
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_routes_events_to_exactly_one_callback() {
        let (transport, mut peers) = MockTransport::new();
        let handle = connect_with(transport);
        let peer = peers.recv().await.unwrap();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        handle.on_event(move |event| {
            let _ = tx1.send(event);
        });
        peer.push_text(r#"{"type": "a"}"#);
        assert_eq!(rx1.recv().await.unwrap(), json!({"type": "a"}));

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        handle.on_event(move |event| {
            let _ = tx2.send(event);
        });
        peer.push_text(r#"{"type": "b"}"#);
        assert_eq!(rx2.recv().await.unwrap(), json!({"type": "b"}));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn sends_after_close_are_dropped() {
        let (transport, mut peers) = MockTransport::new();
        let handle = connect_with(transport.clone());
        let mut peer = peers.recv().await.unwrap();

        handle.close();
        handle.send_text("late");

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert!(peer.sent.try_recv().is_err());
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_the_connection() {
        let (transport, mut peers) = MockTransport::new();
        let handle = connect_with(transport.clone());
        let clone = handle.clone();

        clone.send_text("from-clone");
        let mut peer = peers.recv().await.unwrap();
        assert_eq!(peer.sent.recv().await.unwrap(), "from-clone");
        assert_eq!(transport.attempts(), 1);

        clone.close();
        assert_eq!(handle.ready_state(), ConnectionState::Closed);
    }
}
