//! Realtime WebSocket channel client for Spaces.
//!
//! Maintains one long-lived WebSocket per logical channel (chat rooms plus a
//! singleton notifications channel), reconnects transparently with
//! exponential backoff, buffers outbound messages while disconnected, and
//! delivers inbound JSON events to exactly one subscriber per channel. Chat
//! channels never see presence events; the notifications channel sees
//! everything.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use spaces_realtime::{ConnectionManager, EndpointResolver, StaticSession};
//!
//! # async fn run() {
//! let resolver = EndpointResolver::new("https://api.example.com");
//! let session = Arc::new(StaticSession::new(Some("token".into()), None));
//! let manager = ConnectionManager::new(resolver, session);
//!
//! let chat = manager.chat_channel("general", |event| {
//!     println!("event: {event}");
//! });
//! chat.send_text(r#"{"type": "chat_message", "body": "hello"}"#);
//!
//! // The same key hands back the live channel with a fresh callback.
//! let same = manager.chat_channel("general", |event| {
//!     println!("rebound: {event}");
//! });
//! same.close();
//! # }
//! ```

mod backoff;
pub mod channel;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod handlers;
pub mod manager;
pub mod session;
pub mod transport;

pub use channel::ChannelHandle;
pub use connection::{ConnectionConfig, ConnectionState};
pub use endpoint::EndpointResolver;
pub use error::{RealtimeError, Result};
pub use event::{
    EventCallback, PRESENCE_UPDATE, PresenceChange, PresenceState, PresenceUpdate, USER_PRESENCE,
    event_type, is_presence_event,
};
pub use handlers::{ChannelHandlers, ConnectionError, DisconnectReason};
pub use manager::{ConnectionManager, NOTIFICATIONS_KEY};
pub use session::{SessionStore, SessionUser, StaticSession};
pub use transport::{Frame, Transport, TransportStream, WsTransport};
