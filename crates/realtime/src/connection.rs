//! Per-channel connection state machine.
//!
//! Each logical channel is driven by one tokio task that owns the physical
//! stream, the outbound buffer, and the backoff schedule. The handle side
//! reaches it through an unbounded command channel; the inbound callback and
//! lifecycle hooks live behind shared locks so rebinding them never touches
//! the task.
//!
//! Reconnection runs forever until the caller closes: connect failures and
//! dropped streams feed the same backoff schedule, and a close issued during
//! the backoff sleep cancels the pending attempt immediately.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backoff::ReconnectBackoff;
use crate::event::{self, EventCallback};
use crate::handlers::{ChannelHandlers, ConnectionError, DisconnectReason};
use crate::transport::{Frame, Transport, TransportStream};

/// Tuning knobs for a channel connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Delay before the first reconnect attempt.
    pub initial_reconnect_delay: Duration,
    /// Ceiling for the backoff schedule.
    pub max_reconnect_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub backoff_factor: f64,
    /// The backoff exponent stops growing past this many attempts.
    pub max_backoff_exponent: u32,
    /// Outbound buffer capacity while disconnected; the oldest entry is
    /// dropped when full. `None` removes the bound.
    pub max_buffered_messages: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            initial_reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30_000),
            backoff_factor: 1.5,
            max_backoff_exponent: 10,
            max_buffered_messages: Some(1024),
        }
    }
}

/// Current state of the physical stream backing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connect attempt in flight.
    Connecting,
    /// Stream is up and usable.
    Open,
    /// Stream lost; a reconnect is pending or in flight.
    Reconnecting,
    /// Caller closed the channel; terminal.
    Closed,
}

/// Produces the connection URL for each attempt, so the token and the
/// cache-busting timestamp are fresh every time.
pub(crate) type UrlProducer = Arc<dyn Fn() -> String + Send + Sync>;

pub(crate) enum ConnCmd {
    Send(String),
    Close,
}

/// State shared between a [`crate::ChannelHandle`] and its connection task.
pub(crate) struct ConnectionShared {
    pub(crate) key: String,
    pub(crate) cmd_tx: mpsc::UnboundedSender<ConnCmd>,
    pub(crate) state: Arc<RwLock<ConnectionState>>,
    pub(crate) callback: Arc<RwLock<Option<EventCallback>>>,
    pub(crate) handlers: Arc<RwLock<ChannelHandlers>>,
    pub(crate) closed: Arc<AtomicBool>,
}

/// Spawns the connection task for one channel and returns the shared state
/// the handle wraps.
pub(crate) fn spawn(
    key: String,
    url: UrlProducer,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    callback: Option<EventCallback>,
    handlers: ChannelHandlers,
) -> Arc<ConnectionShared> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let state = Arc::new(RwLock::new(ConnectionState::Connecting));
    let callback = Arc::new(RwLock::new(callback));
    let handlers = Arc::new(RwLock::new(handlers));
    let closed = Arc::new(AtomicBool::new(false));

    let shared = Arc::new(ConnectionShared {
        key: key.clone(),
        cmd_tx,
        state: state.clone(),
        callback: callback.clone(),
        handlers: handlers.clone(),
        closed: closed.clone(),
    });

    let backoff = ReconnectBackoff::new(
        config.initial_reconnect_delay,
        config.max_reconnect_delay,
        config.backoff_factor,
        config.max_backoff_exponent,
    );
    let task = ConnectionTask {
        key,
        url,
        transport,
        config,
        cmd_rx,
        state,
        callback,
        handlers,
        closed,
        buffer: VecDeque::new(),
        backoff,
    };
    tokio::spawn(task.run());

    shared
}

struct ConnectionTask {
    key: String,
    url: UrlProducer,
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    cmd_rx: mpsc::UnboundedReceiver<ConnCmd>,
    state: Arc<RwLock<ConnectionState>>,
    callback: Arc<RwLock<Option<EventCallback>>>,
    handlers: Arc<RwLock<ChannelHandlers>>,
    closed: Arc<AtomicBool>,
    buffer: VecDeque<String>,
    backoff: ReconnectBackoff,
}

impl ConnectionTask {
    async fn run(mut self) {
        let mut delay_next = false;
        'life: loop {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            if delay_next {
                self.set_state(ConnectionState::Reconnecting);
                if !self.backoff_wait().await {
                    break 'life;
                }
            }
            delay_next = true;

            let url = (self.url)();
            match self.transport.connect(&url).await {
                Ok(mut stream) => {
                    info!(channel = %self.key, "connected");
                    self.backoff.reset();
                    self.set_state(ConnectionState::Open);
                    if !self.drain_pending_sends() {
                        let _ = stream.close().await;
                        self.current_handlers()
                            .emit_close(DisconnectReason::new("closed by caller"));
                        break 'life;
                    }
                    self.flush_buffer(stream.as_mut()).await;
                    self.current_handlers().emit_open();
                    if !self.connected(stream).await {
                        break 'life;
                    }
                }
                Err(err) => {
                    warn!(channel = %self.key, error = %err, "connect failed");
                    self.current_handlers()
                        .emit_error(ConnectionError::new(err.to_string(), true));
                }
            }
        }
        self.set_state(ConnectionState::Closed);
        debug!(channel = %self.key, "connection task finished");
    }

    /// Sleeps out the backoff delay, buffering sends that arrive meanwhile.
    /// Returns `false` if the channel was closed during the wait.
    async fn backoff_wait(&mut self) -> bool {
        let delay = self.backoff.next_delay();
        debug!(
            channel = %self.key,
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempts(),
            "reconnect scheduled"
        );
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Send(msg)) => self.buffer_message(msg),
                    Some(ConnCmd::Close) | None => return false,
                },
                _ = &mut sleep => return !self.closed.load(Ordering::SeqCst),
            }
        }
    }

    /// Moves sends that queued up while the connect attempt was in flight
    /// into the buffer, so they go out in the flush ahead of the open hook.
    /// Returns `false` if a close arrived meanwhile.
    fn drain_pending_sends(&mut self) -> bool {
        loop {
            match self.cmd_rx.try_recv() {
                Ok(ConnCmd::Send(msg)) => self.buffer_message(msg),
                Ok(ConnCmd::Close) => return false,
                Err(mpsc::error::TryRecvError::Empty) => return true,
                Err(mpsc::error::TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Runs the open stream until it is lost (`true`, reconnect) or the
    /// caller closes the channel (`false`, terminal).
    async fn connected(&mut self, mut stream: Box<dyn TransportStream>) -> bool {
        loop {
            tokio::select! {
                biased;
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ConnCmd::Send(msg)) => {
                        if let Err(err) = stream.send_text(&msg).await {
                            warn!(channel = %self.key, error = %err, "send failed, requeueing");
                            self.buffer_message(msg);
                            self.current_handlers()
                                .emit_error(ConnectionError::new(err.to_string(), true));
                            self.stream_lost(DisconnectReason::new(format!("send failed: {err}")));
                            return true;
                        }
                    }
                    Some(ConnCmd::Close) | None => {
                        let _ = stream.close().await;
                        self.current_handlers()
                            .emit_close(DisconnectReason::new("closed by caller"));
                        return false;
                    }
                },
                frame = stream.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => self.dispatch(&text),
                    Some(Ok(Frame::Closed(reason))) => {
                        self.stream_lost(reason);
                        return true;
                    }
                    Some(Err(err)) => {
                        self.stream_lost(DisconnectReason::new(err.to_string()));
                        return true;
                    }
                    None => {
                        self.stream_lost(DisconnectReason::new("stream ended"));
                        return true;
                    }
                },
            }
        }
    }

    /// FIFO flush of messages buffered while disconnected. A failed send
    /// keeps the message at the front and aborts the rest of the flush; the
    /// broken stream surfaces through the read loop right after.
    async fn flush_buffer(&mut self, stream: &mut dyn TransportStream) {
        while let Some(msg) = self.buffer.pop_front() {
            if let Err(err) = stream.send_text(&msg).await {
                warn!(
                    channel = %self.key,
                    error = %err,
                    pending = self.buffer.len() + 1,
                    "flush interrupted, keeping messages queued"
                );
                self.buffer.push_front(msg);
                return;
            }
        }
    }

    fn buffer_message(&mut self, msg: String) {
        if let Some(max) = self.config.max_buffered_messages {
            if self.buffer.len() >= max {
                warn!(channel = %self.key, max, "outbound buffer full, dropping oldest");
                self.buffer.pop_front();
            }
        }
        self.buffer.push_back(msg);
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<Value>(text) {
            Ok(decoded) => {
                debug!(
                    channel = %self.key,
                    event_type = event::event_type(&decoded).unwrap_or("?"),
                    "event"
                );
                let callback = self.callback.read().ok().and_then(|slot| slot.clone());
                if let Some(cb) = callback {
                    cb(decoded);
                }
                self.current_handlers().emit_message(text);
            }
            Err(err) => {
                warn!(channel = %self.key, error = %err, "dropping malformed frame");
            }
        }
    }

    fn stream_lost(&self, reason: DisconnectReason) {
        info!(channel = %self.key, reason = %reason, "disconnected");
        self.set_state(ConnectionState::Reconnecting);
        self.current_handlers().emit_close(reason);
    }

    fn set_state(&self, next: ConnectionState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }

    // Cloned out of the lock so user hooks never run under it.
    fn current_handlers(&self) -> ChannelHandlers {
        self.handlers
            .read()
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}
