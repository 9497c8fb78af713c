//! Channel registry.
//!
//! One [`ConnectionManager`] owns all live channels for an application:
//! a map of chat channels keyed by room, plus a dedicated slot for the
//! notifications singleton. The two never share an entry, so a chat room
//! that happens to be named `notifications` gets its own connection.
//! Acquiring a channel that is already live rebinds its callback and hands
//! back the same connection; a fresh connection is built only for unknown
//! keys, and an entry disappears only when its handle is closed. Transient
//! connect failures never evict an entry.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use serde_json::Value;
use tracing::debug;

use crate::channel::ChannelHandle;
use crate::connection::{self, ConnectionConfig, ConnectionShared, UrlProducer};
use crate::endpoint::EndpointResolver;
use crate::event::{self, EventCallback};
use crate::handlers::ChannelHandlers;
use crate::session::SessionStore;
use crate::transport::{Transport, WsTransport};

/// Label carried by the singleton notifications channel, e.g. in logs and
/// [`ChannelHandle::key`]. The channel itself lives in its own slot, never
/// in the chat map.
pub const NOTIFICATIONS_KEY: &str = "notifications";

/// Owns and multiplexes the application's realtime channels.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    resolver: EndpointResolver,
    session: Arc<dyn SessionStore>,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    channels: RwLock<HashMap<String, Arc<ConnectionShared>>>,
    notifications: RwLock<Option<Arc<ConnectionShared>>>,
}

impl ConnectionManager {
    pub fn new(resolver: EndpointResolver, session: Arc<dyn SessionStore>) -> Self {
        Self::with_transport(
            resolver,
            session,
            Arc::new(WsTransport::default()),
            ConnectionConfig::default(),
        )
    }

    pub fn with_config(
        resolver: EndpointResolver,
        session: Arc<dyn SessionStore>,
        config: ConnectionConfig,
    ) -> Self {
        Self::with_transport(resolver, session, Arc::new(WsTransport::default()), config)
    }

    pub fn with_transport(
        resolver: EndpointResolver,
        session: Arc<dyn SessionStore>,
        transport: Arc<dyn Transport>,
        config: ConnectionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                resolver,
                session,
                transport,
                config,
                channels: RwLock::new(HashMap::new()),
                notifications: RwLock::new(None),
            }),
        }
    }

    /// Channel for one chat room. Presence events never reach `on_event`;
    /// everything else is delivered as decoded JSON.
    pub fn chat_channel(
        &self,
        key: &str,
        on_event: impl Fn(Value) + Send + Sync + 'static,
    ) -> ChannelHandle {
        let callback = presence_filtered(Arc::new(on_event));
        let mut channels = lock_write(&self.inner.channels);
        if let Some(shared) = channels.get(key) {
            debug!(channel = %key, "rebinding existing chat channel");
            rebind(shared, callback);
            return self.handle_for(shared.clone(), ChannelKind::Chat);
        }

        debug!(channel = %key, "creating chat channel");
        let shared = self.spawn_channel(key.to_string(), callback, ChannelKind::Chat);
        channels.insert(key.to_string(), shared.clone());
        self.handle_for(shared, ChannelKind::Chat)
    }

    /// The singleton notifications channel. Receives every event, presence
    /// included. Lives in its own slot, so a chat room named
    /// [`NOTIFICATIONS_KEY`] is a different channel.
    pub fn notification_channel(
        &self,
        on_event: impl Fn(Value) + Send + Sync + 'static,
    ) -> ChannelHandle {
        let callback: EventCallback = Arc::new(on_event);
        let mut slot = lock_write(&self.inner.notifications);
        if let Some(shared) = slot.as_ref() {
            debug!("rebinding notifications channel");
            rebind(shared, callback);
            return self.handle_for(shared.clone(), ChannelKind::Notifications);
        }

        debug!("creating notifications channel");
        let shared =
            self.spawn_channel(NOTIFICATIONS_KEY.to_string(), callback, ChannelKind::Notifications);
        *slot = Some(shared.clone());
        self.handle_for(shared, ChannelKind::Notifications)
    }

    /// The live chat channel for `key`, if one exists. Never creates.
    pub fn get(&self, key: &str) -> Option<ChannelHandle> {
        let channels = lock_read(&self.inner.channels);
        channels
            .get(key)
            .map(|shared| self.handle_for(shared.clone(), ChannelKind::Chat))
    }

    /// The live notifications channel, if one exists. Never creates.
    pub fn notifications(&self) -> Option<ChannelHandle> {
        let slot = lock_read(&self.inner.notifications);
        slot.as_ref()
            .map(|shared| self.handle_for(shared.clone(), ChannelKind::Notifications))
    }

    /// Closes every live channel, e.g. on logout.
    pub fn close_all(&self) {
        let mut handles: Vec<ChannelHandle> = {
            let channels = lock_read(&self.inner.channels);
            channels
                .values()
                .map(|shared| self.handle_for(shared.clone(), ChannelKind::Chat))
                .collect()
        };
        handles.extend(self.notifications());
        for handle in handles {
            handle.close();
        }
    }

    fn spawn_channel(
        &self,
        key: String,
        callback: EventCallback,
        kind: ChannelKind,
    ) -> Arc<ConnectionShared> {
        let url: UrlProducer = {
            let inner = self.inner.clone();
            let key = key.clone();
            Arc::new(move || match kind {
                ChannelKind::Chat => inner.resolver.chat_url(&key, inner.session.as_ref()),
                ChannelKind::Notifications => {
                    inner.resolver.notifications_url(inner.session.as_ref())
                }
            })
        };
        connection::spawn(
            key,
            url,
            self.inner.transport.clone(),
            self.inner.config.clone(),
            Some(callback),
            ChannelHandlers::new(),
        )
    }

    fn handle_for(&self, shared: Arc<ConnectionShared>, kind: ChannelKind) -> ChannelHandle {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let registered = shared.clone();
        ChannelHandle::with_unregister(
            shared,
            Arc::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                // Only evict the entry this handle belongs to; a stale
                // handle closed after the key was re-acquired must not
                // take the successor down with it.
                match kind {
                    ChannelKind::Chat => {
                        let mut channels = lock_write(&inner.channels);
                        let current = channels
                            .get(&registered.key)
                            .is_some_and(|cur| Arc::ptr_eq(cur, &registered));
                        if current {
                            channels.remove(&registered.key);
                        }
                    }
                    ChannelKind::Notifications => {
                        let mut slot = lock_write(&inner.notifications);
                        let current = slot
                            .as_ref()
                            .is_some_and(|cur| Arc::ptr_eq(cur, &registered));
                        if current {
                            *slot = None;
                        }
                    }
                }
            }),
        )
    }
}

fn rebind(shared: &Arc<ConnectionShared>, callback: EventCallback) {
    if let Ok(mut slot) = shared.callback.write() {
        *slot = Some(callback);
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = lock_read(&self.inner.channels).len();
        let notifications = lock_read(&self.inner.notifications).is_some();
        f.debug_struct("ConnectionManager")
            .field("channels", &count)
            .field("notifications", &notifications)
            .finish()
    }
}

#[derive(Clone, Copy)]
enum ChannelKind {
    Chat,
    Notifications,
}

fn presence_filtered(callback: EventCallback) -> EventCallback {
    Arc::new(move |decoded| {
        if event::is_presence_event(&decoded) {
            debug!(
                event_type = event::event_type(&decoded).unwrap_or("?"),
                "presence event withheld from chat channel"
            );
            return;
        }
        callback(decoded)
    })
}

fn lock_read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn lock_write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::session::{SessionUser, StaticSession};
    use crate::transport::mock::MockTransport;

    fn manager_with(transport: Arc<MockTransport>) -> ConnectionManager {
        let session = StaticSession::new(
            Some("tok".into()),
            Some(SessionUser {
                id: "u1".into(),
                email: Some("u1@example.com".into()),
            }),
        );
        ConnectionManager::with_transport(
            EndpointResolver::new("https://api.example.com"),
            Arc::new(session),
            transport,
            ConnectionConfig::default(),
        )
    }

    fn collector() -> (EventCallback, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(move |event| {
                let _ = tx.send(event);
            }),
            rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn chat_channel_connects_to_the_chat_endpoint() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport);
        let (cb, _rx) = collector();
        let _handle = manager.chat_channel("general", move |e| cb(e));

        let peer = peers.recv().await.unwrap();
        assert!(peer.url.starts_with("wss://api.example.com/ws/chat/general?"));
        assert!(peer.url.contains("token=tok"));
        assert!(peer.url.contains("userId=u1"));
        assert!(peer.url.contains("ts="));
    }

    #[tokio::test(start_paused = true)]
    async fn notification_channel_connects_to_the_notifications_endpoint() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport);
        let _handle = manager.notification_channel(|_| {});

        let peer = peers.recv().await.unwrap();
        assert!(peer.url.starts_with("wss://api.example.com/ws/notifications?"));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_acquire_reuses_the_connection_and_rebinds() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let (cb1, mut rx1) = collector();
        let first = manager.chat_channel("general", move |e| cb1(e));
        let peer = peers.recv().await.unwrap();

        let (cb2, mut rx2) = collector();
        let second = manager.chat_channel("general", move |e| cb2(e));
        assert_eq!(transport.attempts(), 1);
        assert_eq!(first.key(), second.key());

        peer.push_text(r#"{"type": "chat_message"}"#);
        assert_eq!(rx2.recv().await.unwrap(), json!({"type": "chat_message"}));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_channel_is_a_singleton() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let a = manager.notification_channel(|_| {});
        let _peer = peers.recv().await.unwrap();
        let _b = manager.notification_channel(|_| {});
        assert_eq!(transport.attempts(), 1);

        a.close();
        assert!(manager.notifications().is_none());

        let _fresh = manager.notification_channel(|_| {});
        let _peer2 = peers.recv().await.unwrap();
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn chat_room_named_notifications_is_its_own_channel() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let (ncb, mut nrx) = collector();
        let _notif = manager.notification_channel(move |e| ncb(e));
        let npeer = peers.recv().await.unwrap();

        let (ccb, mut crx) = collector();
        let _chat = manager.chat_channel(NOTIFICATIONS_KEY, move |e| ccb(e));
        let cpeer = peers.recv().await.unwrap();

        // Two distinct connections to two distinct endpoints.
        assert_eq!(transport.attempts(), 2);
        assert!(npeer.url.starts_with("wss://api.example.com/ws/notifications?"));
        assert!(cpeer.url.starts_with("wss://api.example.com/ws/chat/notifications?"));

        // The singleton still gets its full feed, presence included.
        npeer.push_text(r#"{"type": "presence_update", "online_users": []}"#);
        assert_eq!(nrx.recv().await.unwrap()["type"], "presence_update");

        // The chat room delivers to its own callback only.
        cpeer.push_text(r#"{"type": "chat_message", "body": "hi"}"#);
        assert_eq!(crx.recv().await.unwrap()["type"], "chat_message");
        assert!(nrx.try_recv().is_err());
        assert!(crx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn chat_channels_never_see_presence_events() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport);

        let (cb, mut rx) = collector();
        let _handle = manager.chat_channel("general", move |e| cb(e));
        let peer = peers.recv().await.unwrap();

        peer.push_text(r#"{"type": "presence_update", "online_users": []}"#);
        peer.push_text(r#"{"type": "user_presence", "email": "a@x", "event": "online"}"#);
        peer.push_text(r#"{"type": "chat_message", "body": "hi"}"#);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered["type"], "chat_message");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn notification_channel_sees_presence_events() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport);

        let (cb, mut rx) = collector();
        let _handle = manager.notification_channel(move |e| cb(e));
        let peer = peers.recv().await.unwrap();

        peer.push_text(r#"{"type": "presence_update", "online_users": ["a@x"]}"#);
        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered["type"], "presence_update");
    }

    #[tokio::test(start_paused = true)]
    async fn closing_a_handle_forgets_the_entry() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let handle = manager.chat_channel("general", |_| {});
        let _peer = peers.recv().await.unwrap();
        assert!(manager.get("general").is_some());

        handle.close();
        assert!(manager.get("general").is_none());

        // A later acquire builds a brand-new connection.
        let _fresh = manager.chat_channel("general", |_| {});
        let _peer2 = peers.recv().await.unwrap();
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_keeps_the_entry() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let _handle = manager.chat_channel("general", |_| {});
        let peer = peers.recv().await.unwrap();
        peer.sever();

        // Still registered while reconnecting.
        assert!(manager.get("general").is_some());
        let _peer2 = peers.recv().await.unwrap();
        assert_eq!(transport.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_closes_every_channel() {
        let (transport, mut peers) = MockTransport::new();
        let manager = manager_with(transport.clone());

        let a = manager.chat_channel("general", |_| {});
        let _p1 = peers.recv().await.unwrap();
        let b = manager.notification_channel(|_| {});
        let _p2 = peers.recv().await.unwrap();

        manager.close_all();
        assert!(manager.get("general").is_none());
        assert!(manager.notifications().is_none());

        tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        assert_eq!(transport.attempts(), 2);
        drop((a, b));
    }
}
