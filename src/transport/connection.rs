//! WebSocket connection and event loop.
//!
//! This module owns the single duplex connection to the server, gates
//! deferred work behind the ready flag and routes inbound frames into the
//! [`Reactor`].
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - The WebSocket handshake, then the `Connecting → Ready` transition
//! - Incoming frames, dispatched by event name and correlation key
//! - Outgoing frames queued by [`Connection::send`]
//! - The `Closed` transition on remote close, error or shutdown
//!
//! Frames sent while connecting wait in the command channel and go out in
//! call order once the handshake completes.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, CorrelationKey};
use crate::protocol::Envelope;
use crate::reactor::Reactor;

use super::ready::{ConnectionState, DisconnectReason, ReadyGate};

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a serialized frame.
    Send(String),
    /// Close the connection.
    Shutdown,
}

// ============================================================================
// Connection
// ============================================================================

/// WebSocket connection to the server.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone; clones share the same
/// socket, gate and registry. All operations except the `wait_*` helpers are
/// non-blocking.
#[derive(Clone)]
pub struct Connection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Ready flag and deferred callbacks (shared with event loop).
    gate: ReadyGate,
    /// Registry inbound frames are routed to (shared with event loop).
    reactor: Reactor,
    /// Runtime the event loop and expiry timers run on.
    runtime: Handle,
}

impl Connection {
    /// Starts connecting to `url` and returns immediately.
    ///
    /// The connection begins in [`ConnectionState::Connecting`]; the
    /// handshake and event loop run on a spawned task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn connect(url: Url, reactor: Reactor) -> Result<Self> {
        let (connection, mut command_rx) = Self::detached(reactor)?;

        let gate = connection.gate.clone();
        let task_reactor = connection.reactor.clone();
        connection.runtime.spawn(async move {
            debug!(%url, "Connecting");

            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!(%url, "WebSocket connection established");
                    Self::run_event_loop(ws_stream, command_rx, gate, task_reactor).await;
                }
                Err(e) => {
                    error!(%url, error = %e, "WebSocket handshake failed");
                    command_rx.close();
                    gate.mark_closed(DisconnectReason::ConnectFailed(e.to_string()));
                }
            }
        });

        Ok(connection)
    }

    /// Adopts an already open WebSocket stream.
    ///
    /// The connection turns ready as soon as the event loop task starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if called outside a tokio runtime.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>, reactor: Reactor) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (connection, command_rx) = Self::detached(reactor)?;

        connection.runtime.spawn(Self::run_event_loop(
            ws_stream,
            command_rx,
            connection.gate.clone(),
            connection.reactor.clone(),
        ));

        Ok(connection)
    }

    fn detached(
        reactor: Reactor,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionCommand>)> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::config(format!("a tokio runtime is required: {e}")))?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                command_tx,
                gate: ReadyGate::new(),
                reactor,
                runtime,
            },
            command_rx,
        ))
    }

    /// Returns the registry inbound frames are routed to.
    #[inline]
    #[must_use]
    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.gate.state()
    }

    /// Returns `true` once the transport is open and not yet lost.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Returns the reason the connection closed, if it has.
    #[inline]
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.gate.disconnect_reason()
    }

    /// Returns a receiver that observes every state change.
    #[inline]
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.gate.watch()
    }

    /// Runs `callback` once the connection is ready.
    ///
    /// See [`ReadyGate::on_ready`].
    #[inline]
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.gate.on_ready(callback);
    }

    /// Runs any queued ready callbacks if the connection is ready.
    #[inline]
    pub fn flush_ready(&self) {
        self.gate.flush();
    }

    /// Runs `callback` once the connection is lost.
    ///
    /// See [`ReadyGate::on_lost`].
    #[inline]
    pub fn on_lost<F>(&self, callback: F)
    where
        F: FnOnce(&DisconnectReason) + Send + 'static,
    {
        self.gate.on_lost(callback);
    }

    /// Waits until the connection is ready.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionTimeout`] if not ready within `ready_timeout`
    /// - [`Error::Connection`] if the handshake failed
    /// - [`Error::ConnectionClosed`] if the connection is lost first
    pub async fn wait_ready(&self, ready_timeout: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.gate.on_ready(move || {
            let _ = tx.send(());
        });

        match timeout(ready_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => match self.gate.disconnect_reason() {
                Some(DisconnectReason::ConnectFailed(message)) => {
                    Err(Error::connection(message))
                }
                _ => Err(Error::ConnectionClosed),
            },
            Err(_) => Err(Error::connection_timeout(ready_timeout.as_millis() as u64)),
        }
    }

    /// Waits until the connection is closed and returns the reason.
    pub async fn wait_closed(&self) -> DisconnectReason {
        let (tx, rx) = oneshot::channel();
        self.gate.on_lost(move |reason| {
            let _ = tx.send(reason.clone());
        });

        // The gate outlives this call, so the sender is only dropped after firing.
        rx.await.unwrap_or(DisconnectReason::Shutdown)
    }

    /// Serializes `envelope` and queues it for transmission.
    ///
    /// Frames queued while connecting are written in call order once the
    /// handshake completes.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the connection is lost
    /// - [`Error::Json`] if the payload cannot be serialized
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        if self.gate.state() == ConnectionState::Closed {
            return Err(Error::ConnectionClosed);
        }

        let frame = envelope.to_frame()?;
        self.command_tx
            .send(ConnectionCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)?;

        trace!(
            event = %envelope.event,
            correlated = envelope.timestamp.is_some(),
            "Envelope queued"
        );
        Ok(())
    }

    /// Removes the one-shot registration `(name, id)` after `after` elapses,
    /// unless a reply consumed it first.
    pub fn expire(&self, name: impl Into<String>, id: CorrelationId, after: Duration) {
        let name = name.into();
        let reactor = self.reactor.clone();

        self.runtime.spawn(async move {
            sleep(after).await;
            if reactor.cancel(&name, id) {
                debug!(
                    event = %name,
                    correlation_id = %id,
                    after_ms = after.as_millis() as u64,
                    "One-shot registration expired"
                );
            }
        });
    }

    /// Closes the connection.
    ///
    /// Queued frames ahead of the shutdown are still written.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(ConnectionCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        gate: ReadyGate,
        reactor: Reactor,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        gate.mark_ready();

        let reason = loop {
            tokio::select! {
                // Incoming frames from server
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            Self::handle_incoming_message(&text, &reactor);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("WebSocket closed by remote");
                            break DisconnectReason::ClosedByRemote;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "WebSocket error");
                            break DisconnectReason::TransportError(e.to_string());
                        }

                        None => {
                            debug!("WebSocket stream ended");
                            break DisconnectReason::ClosedByRemote;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from Rust API
                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send(frame)) => {
                            if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                                error!(error = %e, "Failed to write frame");
                                break DisconnectReason::TransportError(e.to_string());
                            }
                        }

                        Some(ConnectionCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = ws_write.close().await;
                            break DisconnectReason::Shutdown;
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = ws_write.close().await;
                            break DisconnectReason::Shutdown;
                        }
                    }
                }
            }
        };

        // Refuse sends before anyone can observe `Closed`.
        command_rx.close();
        gate.mark_closed(reason);

        debug!(pending = reactor.pending_count(), "Event loop terminated");
    }

    /// Routes an inbound text frame to the registry.
    ///
    /// Correlated frames consume their one-shot entry; uncorrelated frames
    /// go to the standing subscription. Malformed frames are dropped.
    fn handle_incoming_message(text: &str, reactor: &Reactor) {
        let envelope = match Envelope::from_frame(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, text = %text, "Dropping malformed frame");
                return;
            }
        };

        let Envelope {
            event,
            data,
            timestamp,
        } = envelope;

        match timestamp {
            Some(id) => {
                reactor.dispatch_once(&event, id, data);
            }
            None => {
                reactor.dispatch(&event, &CorrelationKey::Default, data);
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.gate.state())
            .field("reactor", &self.reactor)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
