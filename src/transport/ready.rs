//! Connection state gate.
//!
//! Tracks whether the transport is open and holds the work deferred until
//! it is:
//!
//! ```text
//! Connecting ──open──► Ready
//!     │                  │
//!     └──────lost────────┴──► Closed
//! ```
//!
//! Callbacks queued with [`ReadyGate::on_ready`] while connecting run once,
//! in registration order, the moment the gate opens. Callbacks registered
//! while that queue is still draining are appended to it. Callbacks
//! registered afterwards run synchronously on the caller.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

// ============================================================================
// Types
// ============================================================================

/// Deferred work run once the connection is ready.
pub type ReadyCallback = Box<dyn FnOnce() + Send>;

/// Callback run once when the connection is lost.
pub type LostCallback = Box<dyn FnOnce(&DisconnectReason) + Send>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting,
    /// Transport open, frames flow.
    Ready,
    /// Transport gone. Terminal.
    Closed,
}

// ============================================================================
// DisconnectReason
// ============================================================================

/// Why a connection entered [`ConnectionState::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The WebSocket handshake failed.
    ConnectFailed(String),
    /// The server sent a close frame or ended the stream.
    ClosedByRemote,
    /// Reading or writing the socket failed.
    TransportError(String),
    /// Closed locally with `shutdown`.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(message) => write!(f, "connect failed: {message}"),
            Self::ClosedByRemote => f.write_str("closed by remote"),
            Self::TransportError(message) => write!(f, "transport error: {message}"),
            Self::Shutdown => f.write_str("shut down"),
        }
    }
}

// ============================================================================
// ReadyGate
// ============================================================================

struct GateInner {
    state: ConnectionState,
    pending_ready: Vec<ReadyCallback>,
    /// Set while `mark_ready` runs the queue; new callbacks must queue
    /// behind it.
    draining: bool,
    lost: Vec<LostCallback>,
    reason: Option<DisconnectReason>,
}

/// Ready flag plus the deferred-callback queues.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ReadyGate {
    inner: Arc<Mutex<GateInner>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    /// Creates a gate in [`ConnectionState::Connecting`].
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        Self {
            inner: Arc::new(Mutex::new(GateInner {
                state: ConnectionState::Connecting,
                pending_ready: Vec::new(),
                draining: false,
                lost: Vec::new(),
                reason: None,
            })),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Returns `true` once the transport is open and not yet lost.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Returns the number of callbacks waiting for readiness.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending_ready.len()
    }

    /// Returns the reason the connection closed, if it has.
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.inner.lock().reason.clone()
    }

    /// Returns a receiver that observes every state change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Runs `callback` once the connection is ready.
    ///
    /// While connecting, or while the ready queue is still draining, the
    /// callback is queued. When ready, anything still queued is flushed first
    /// and then `callback` runs synchronously. After the connection is lost
    /// the callback is dropped unrun.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let queued = {
            let mut inner = self.inner.lock();
            match inner.state {
                ConnectionState::Connecting => {
                    inner.pending_ready.push(Box::new(callback));
                    return;
                }
                ConnectionState::Ready if inner.draining => {
                    inner.pending_ready.push(Box::new(callback));
                    return;
                }
                ConnectionState::Closed => {
                    debug!("Connection closed, dropping ready callback");
                    return;
                }
                ConnectionState::Ready => std::mem::take(&mut inner.pending_ready),
            }
        };

        Self::run_all(queued);
        callback();
    }

    /// Flushes queued ready callbacks if the connection is ready.
    pub fn flush(&self) {
        let queued = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Ready || inner.draining {
                return;
            }
            std::mem::take(&mut inner.pending_ready)
        };
        Self::run_all(queued);
    }

    /// Runs `callback` once the connection is lost.
    ///
    /// Runs immediately if it already is.
    pub fn on_lost<F>(&self, callback: F)
    where
        F: FnOnce(&DisconnectReason) + Send + 'static,
    {
        let reason = {
            let mut inner = self.inner.lock();
            match inner.reason.clone() {
                Some(reason) => reason,
                None => {
                    inner.lost.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&reason);
    }

    /// Transitions `Connecting → Ready` and drains the ready queue in
    /// registration order.
    ///
    /// Callbacks registered by any thread during the drain are appended and
    /// run here too, so nothing overtakes an earlier registration.
    ///
    /// Returns `false` if the gate was not connecting.
    pub(crate) fn mark_ready(&self) -> bool {
        let mut queued = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Connecting {
                return false;
            }
            inner.state = ConnectionState::Ready;
            inner.draining = true;
            std::mem::take(&mut inner.pending_ready)
        };
        self.state_tx.send_replace(ConnectionState::Ready);
        debug!(queued = queued.len(), "Connection ready");

        loop {
            Self::run_all(queued);

            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Ready || inner.pending_ready.is_empty() {
                inner.draining = false;
                break;
            }
            queued = std::mem::take(&mut inner.pending_ready);
        }
        true
    }

    /// Transitions to `Closed`, discards unrun ready callbacks and fires the
    /// lost callbacks.
    ///
    /// Returns `false` if the gate was already closed.
    pub(crate) fn mark_closed(&self, reason: DisconnectReason) -> bool {
        let (discarded, lost) = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return false;
            }
            inner.state = ConnectionState::Closed;
            inner.draining = false;
            inner.reason = Some(reason.clone());
            (
                std::mem::take(&mut inner.pending_ready),
                std::mem::take(&mut inner.lost),
            )
        };
        self.state_tx.send_replace(ConnectionState::Closed);

        debug!(%reason, discarded = discarded.len(), "Connection lost");
        drop(discarded);
        for callback in lost {
            callback(&reason);
        }
        true
    }

    fn run_all(callbacks: Vec<ReadyCallback>) {
        for callback in callbacks {
            callback();
        }
    }
}

impl fmt::Debug for ReadyGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ReadyGate")
            .field("state", &inner.state)
            .field("pending_ready", &inner.pending_ready.len())
            .field("reason", &inner.reason)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
