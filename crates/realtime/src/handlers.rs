//! Lifecycle hook slots for a channel.
//!
//! All hooks are optional and advisory: the connection keeps buffering,
//! reconnecting, and delivering whether or not any are registered. The slots
//! live behind a shared lock on the handle, so replacing them takes effect
//! for the very next event without recreating the connection.

use std::fmt;
use std::sync::Arc;

/// Why a physical stream went away.
#[derive(Debug, Clone)]
pub struct DisconnectReason {
    pub message: String,
    /// WebSocket close code, if the peer sent one.
    pub code: Option<u16>,
}

impl DisconnectReason {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: u16) -> Self {
        Self {
            message: message.into(),
            code: Some(code),
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (code: {})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Error information passed to the `on_error` hook.
#[derive(Debug, Clone)]
pub struct ConnectionError {
    pub message: String,
    /// Whether the automatic reconnect may resolve it.
    pub recoverable: bool,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

pub type OnOpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type OnCloseCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;
pub type OnErrorCallback = Arc<dyn Fn(ConnectionError) + Send + Sync>;
pub type OnMessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Optional per-channel lifecycle hooks.
#[derive(Clone, Default)]
pub struct ChannelHandlers {
    /// Fired after a physical stream opens and the outbound buffer flushed.
    pub(crate) on_open: Option<OnOpenCallback>,

    /// Fired whenever the physical stream goes away, caller-closed or not.
    pub(crate) on_close: Option<OnCloseCallback>,

    /// Fired on connect failures and send failures.
    pub(crate) on_error: Option<OnErrorCallback>,

    /// Fired with the raw text of every delivered inbound frame.
    pub(crate) on_message: Option<OnMessageCallback>,
}

impl fmt::Debug for ChannelHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlers")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

impl ChannelHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(DisconnectReason) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(ConnectionError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_open(&self) {
        if let Some(f) = &self.on_open {
            f();
        }
    }

    pub(crate) fn emit_close(&self, reason: DisconnectReason) {
        if let Some(f) = &self.on_close {
            f(reason);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    pub(crate) fn emit_message(&self, raw: &str) {
        if let Some(f) = &self.on_message {
            f(raw);
        }
    }
}
