//! Session event stream
//!
//! Shell output and lifecycle notifications fan out through a bounded
//! broadcast channel. A short replay backlog lets a subscriber that attaches
//! after connect (the UI usually does) still see the banner and first prompt.
//! Snapshotting the backlog and subscribing happen under one lock, so a
//! subscriber sees every chunk exactly once and in remote order.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Why a session reached its terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// `disconnect()` was called
    Disconnected,
    /// The remote shell exited (channel closed)
    ShellExited,
    /// The shell channel failed mid-session
    ShellFailed,
    /// The transport went away (server hang-up, keepalive exhausted)
    TransportClosed,
}

/// What a subscriber receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Raw shell bytes, in remote order
    Data(Bytes),
    /// Non-fatal error (e.g. shell setup failed on a live transport)
    Error(String),
    /// Terminal notification; nothing follows it
    Closed(CloseReason),
}

struct Backlog {
    chunks: VecDeque<Bytes>,
    bytes: usize,
    limit: usize,
    closed: Option<CloseReason>,
}

impl Backlog {
    fn push(&mut self, chunk: Bytes) {
        if self.limit == 0 {
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push_back(chunk);
        while self.bytes > self.limit {
            match self.chunks.pop_front() {
                Some(front) => self.bytes -= front.len(),
                None => break,
            }
        }
    }
}

/// Publisher side, owned by the session
pub struct EventHub {
    backlog: Mutex<Backlog>,
    tx: broadcast::Sender<SessionEvent>,
}

impl EventHub {
    pub fn new(capacity: usize, replay_bytes: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            backlog: Mutex::new(Backlog {
                chunks: VecDeque::new(),
                bytes: 0,
                limit: replay_bytes,
                closed: None,
            }),
            tx,
        }
    }

    /// Publish shell output
    pub fn publish_data(&self, chunk: Bytes) {
        let mut backlog = self.backlog.lock();
        if backlog.closed.is_some() {
            return;
        }
        backlog.push(chunk.clone());
        // No receivers is fine: the backlog keeps the tail
        let _ = self.tx.send(SessionEvent::Data(chunk));
    }

    /// Publish a non-fatal error
    pub fn publish_error(&self, message: impl Into<String>) {
        let backlog = self.backlog.lock();
        if backlog.closed.is_none() {
            let _ = self.tx.send(SessionEvent::Error(message.into()));
        }
    }

    /// Publish the terminal notification. Only the first call has effect.
    pub fn close(&self, reason: CloseReason) -> bool {
        let mut backlog = self.backlog.lock();
        if backlog.closed.is_some() {
            return false;
        }
        backlog.closed = Some(reason);
        let _ = self.tx.send(SessionEvent::Closed(reason));
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Attach a new subscriber: backlog first, then live events
    pub fn subscribe(&self) -> ShellStream {
        let backlog = self.backlog.lock();
        let mut pending: VecDeque<SessionEvent> =
            backlog.chunks.iter().cloned().map(SessionEvent::Data).collect();
        if let Some(reason) = backlog.closed {
            pending.push_back(SessionEvent::Closed(reason));
        }
        ShellStream {
            pending,
            rx: self.tx.subscribe(),
            finished: false,
        }
    }
}

/// Subscriber side: a cancellable stream of session events.
///
/// Dropping it (or calling [`ShellStream::unsubscribe`]) detaches; it never
/// keeps the session alive.
pub struct ShellStream {
    pending: VecDeque<SessionEvent>,
    rx: broadcast::Receiver<SessionEvent>,
    finished: bool,
}

impl ShellStream {
    /// Next event, or `None` once the session has ended
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        if self.finished {
            return None;
        }

        if let Some(event) = self.pending.pop_front() {
            if matches!(event, SessionEvent::Closed(_)) {
                self.finished = true;
            }
            return Some(event);
        }

        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if matches!(event, SessionEvent::Closed(_)) {
                        self.finished = true;
                    }
                    return Some(event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Shell subscriber lagged, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }

    /// Explicitly detach from the session
    pub fn unsubscribe(self) {}
}
