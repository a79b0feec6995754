//! Envelope builder: publish and request in one call.
//!
//! A publish sends a named event. Attaching a callback turns it into a
//! request: a one-shot registration keyed by a fresh [`CorrelationId`] is
//! stored before the frame leaves, and the id travels as the frame's
//! `timestamp` so the reply can be matched.
//!
//! # Example
//!
//! ```ignore
//! use meteor_client::PublishOptions;
//! use serde_json::json;
//!
//! // Fire-and-forget
//! meteor.publish(PublishOptions::new("chat/new_message").data(json!({ "msg": "hi" })))?;
//!
//! // With a reply callback
//! meteor.publish(
//!     PublishOptions::new("chat/history").callback(|reply| println!("{reply}")),
//! )?;
//!
//! // Awaiting the reply
//! let reply = meteor.request("chat/history", json!({})).await?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::CorrelationId;
use crate::protocol::{Envelope, empty_payload};
use crate::reactor::{EventCallback, Subscription};
use crate::transport::{Connection, ConnectionState};

// ============================================================================
// PublishOptions
// ============================================================================

/// Options for [`Connection::publish`].
#[derive(Clone)]
pub struct PublishOptions {
    /// Target event name.
    pub name: String,
    /// Payload, `{}` by default.
    pub data: Value,
    /// One-shot reply handler.
    pub callback: Option<EventCallback>,
    /// Transmit immediately (default `true`).
    pub autosend: bool,
    /// Drop the reply registration if no reply arrives in time.
    pub expire_after: Option<Duration>,
}

impl PublishOptions {
    /// Creates options for `name` with an empty payload and no callback.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: empty_payload(),
            callback: None,
            autosend: true,
            expire_after: None,
        }
    }

    /// Sets the payload.
    #[inline]
    #[must_use]
    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Sets the one-shot reply handler.
    #[must_use]
    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Sets whether to transmit immediately.
    #[inline]
    #[must_use]
    pub fn autosend(mut self, autosend: bool) -> Self {
        self.autosend = autosend;
        self
    }

    /// Sets the reply registration lifetime.
    #[inline]
    #[must_use]
    pub fn expire_after(mut self, after: Duration) -> Self {
        self.expire_after = Some(after);
        self
    }
}

impl fmt::Debug for PublishOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishOptions")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("callback", &self.callback.is_some())
            .field("autosend", &self.autosend)
            .field("expire_after", &self.expire_after)
            .finish()
    }
}

// ============================================================================
// Publication
// ============================================================================

/// Result of a publish: the built envelope and the echoed callback.
#[derive(Clone)]
pub struct Publication {
    envelope: Envelope,
    callback: Option<EventCallback>,
    sent: bool,
}

impl Publication {
    /// Returns the built envelope.
    #[inline]
    #[must_use]
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Consumes the publication, returning the envelope.
    #[inline]
    #[must_use]
    pub fn into_envelope(self) -> Envelope {
        self.envelope
    }

    /// Returns the reply callback, if one was supplied.
    #[inline]
    #[must_use]
    pub fn callback(&self) -> Option<&EventCallback> {
        self.callback.as_ref()
    }

    /// Returns the correlation id, present only with a callback.
    #[inline]
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.envelope.timestamp
    }

    /// Returns `true` once the envelope has been handed to the connection.
    #[inline]
    #[must_use]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Sends a publication built with `autosend(false)`.
    ///
    /// Sending twice transmits the same frame twice.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    pub fn send(&mut self, connection: &Connection) -> Result<()> {
        connection.send(&self.envelope)?;
        self.sent = true;
        Ok(())
    }
}

impl fmt::Debug for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publication")
            .field("envelope", &self.envelope)
            .field("callback", &self.callback.is_some())
            .field("sent", &self.sent)
            .finish()
    }
}

// ============================================================================
// Connection - Publish
// ============================================================================

impl Connection {
    /// Builds an envelope, registers its reply callback and sends it.
    ///
    /// The registration happens before transmission, so even an immediate
    /// reply is matched. If sending fails the registration is rolled back.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the event name is empty
    /// - [`Error::ConnectionClosed`] if `autosend` and the connection is lost
    pub fn publish(&self, options: PublishOptions) -> Result<Publication> {
        let PublishOptions {
            name,
            data,
            callback,
            autosend,
            expire_after,
        } = options;

        let mut envelope = Envelope::new(name, data)?;

        if let Some(callback) = &callback {
            let id = CorrelationId::generate();
            self.reactor().add_event(
                Subscription::from_callback(envelope.event.clone(), Arc::clone(callback))
                    .correlated(id),
            );
            envelope = envelope.with_correlation(id);
        }

        let mut publication = Publication {
            envelope,
            callback,
            sent: false,
        };

        if autosend && let Err(e) = publication.send(self) {
            self.cancel(&publication);
            return Err(e);
        }

        if let (Some(id), Some(after)) = (publication.correlation_id(), expire_after) {
            self.expire(publication.envelope.event.clone(), id, after);
        }

        debug!(
            event = %publication.envelope.event,
            correlation_id = ?publication.correlation_id(),
            sent = publication.sent,
            "Published"
        );

        Ok(publication)
    }

    /// Drops the pending reply registration of `publication`.
    ///
    /// Returns `true` if a registration was removed.
    pub fn cancel(&self, publication: &Publication) -> bool {
        publication
            .correlation_id()
            .is_some_and(|id| self.reactor().cancel(&publication.envelope.event, id))
    }

    /// Publishes `name` and waits for the correlated reply.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if no reply arrives within `request_timeout`
    /// - [`Error::ConnectionClosed`] if the connection is lost first
    /// - any error from [`Connection::publish`]
    pub async fn request(
        &self,
        name: impl Into<String>,
        data: Value,
        request_timeout: Duration,
    ) -> Result<Value> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        let reply_tx = Mutex::new(Some(reply_tx));

        let publication = self.publish(PublishOptions::new(name).data(data).callback(
            move |payload| {
                if let Some(tx) = reply_tx.lock().take() {
                    let _ = tx.send(payload);
                }
            },
        ))?;

        let mut state = self.watch_state();
        let outcome = timeout(request_timeout, async {
            // A reply dispatched just before the close still wins.
            tokio::select! {
                biased;

                reply = &mut reply_rx => reply.map_err(|_| Error::ConnectionClosed),
                _ = state.wait_for(|state| *state == ConnectionState::Closed) => {
                    reply_rx.try_recv().map_err(|_| Error::ConnectionClosed)
                }
            }
        })
        .await;

        match outcome {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(e)) => {
                self.cancel(&publication);
                Err(e)
            }
            Err(_) => {
                self.cancel(&publication);
                let event = publication.envelope.event;
                let id = publication
                    .envelope
                    .timestamp
                    .ok_or_else(|| Error::protocol("request published without correlation"))?;
                Err(Error::request_timeout(
                    event,
                    id,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::WebSocketStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::tungstenite::protocol::Role;

    use crate::identifiers::CorrelationKey;
    use crate::reactor::Reactor;

    const WAIT: Duration = Duration::from_secs(5);

    async fn pair() -> (Connection, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;

        let connection = Connection::from_stream(client, Reactor::new()).expect("inside runtime");
        connection.wait_ready(WAIT).await.expect("ready");
        (connection, server)
    }

    async fn next_envelope(server: &mut WebSocketStream<DuplexStream>) -> Envelope {
        loop {
            let message = timeout(WAIT, server.next())
                .await
                .expect("frame in time")
                .expect("stream open")
                .expect("valid frame");
            if let Message::Text(text) = message {
                return Envelope::from_frame(text.as_str()).expect("envelope");
            }
        }
    }

    #[test]
    fn test_options_defaults() {
        let options = PublishOptions::new("chat/new_message");
        assert_eq!(options.data, json!({}));
        assert!(options.callback.is_none());
        assert!(options.autosend);
        assert!(options.expire_after.is_none());
    }

    #[tokio::test]
    async fn test_publish_without_callback() {
        let (connection, mut server) = pair().await;

        let publication = connection
            .publish(PublishOptions::new("chat/new_message").data(json!({ "msg": "hi" })))
            .expect("publish");

        assert!(publication.is_sent());
        assert!(publication.correlation_id().is_none());
        assert!(publication.callback().is_none());
        assert_eq!(connection.reactor().pending_count(), 0);

        let envelope = next_envelope(&mut server).await;
        assert_eq!(envelope.event, "chat/new_message");
        assert_eq!(envelope.data, json!({ "msg": "hi" }));
        assert!(envelope.timestamp.is_none());
    }

    #[tokio::test]
    async fn test_publish_with_callback_registers_before_send() {
        let (connection, mut server) = pair().await;
        let mut replies = {
            let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
            let publication = connection
                .publish(PublishOptions::new("chat/ping").callback(move |payload| {
                    let _ = tx.send(payload);
                }))
                .expect("publish");

            let id = publication.correlation_id().expect("correlated");
            assert!(publication.callback().is_some());
            assert!(
                connection
                    .reactor()
                    .contains("chat/ping", &CorrelationKey::Correlated(id))
            );
            rx
        };

        let request = next_envelope(&mut server).await;
        let id = request.timestamp.expect("timestamp on wire");

        let reply = Envelope::new("chat/ping", json!({ "pong": true }))
            .expect("valid")
            .with_correlation(id);
        for _ in 0..2 {
            server
                .send(Message::Text(reply.to_frame().expect("frame").into()))
                .await
                .expect("server send");
        }

        let payload = timeout(WAIT, replies.recv()).await.expect("in time").expect("payload");
        assert_eq!(payload, json!({ "pong": true }));

        // Second identical reply finds nothing.
        let sync = Envelope::new("sync", json!({})).expect("valid");
        let mut synced = connection.reactor().event_channel("sync");
        server
            .send(Message::Text(sync.to_frame().expect("frame").into()))
            .await
            .expect("server send");
        timeout(WAIT, synced.recv()).await.expect("in time").expect("sync");

        assert!(replies.try_recv().is_err());
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_autosend_false_builds_without_sending() {
        let (connection, mut server) = pair().await;

        let mut publication = connection
            .publish(PublishOptions::new("draft").autosend(false))
            .expect("publish");
        assert!(!publication.is_sent());

        publication.send(&connection).expect("send");
        assert!(publication.is_sent());
        assert_eq!(next_envelope(&mut server).await.event, "draft");
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let (connection, _server) = pair().await;
        let err = connection
            .publish(PublishOptions::new("").callback(|_| {}))
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_send_rolls_back_registration() {
        let (connection, _server) = pair().await;
        connection.shutdown();
        connection.wait_closed().await;

        let err = connection
            .publish(PublishOptions::new("chat/ping").callback(|_| {}))
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel() {
        let (connection, _server) = pair().await;
        let publication = connection
            .publish(PublishOptions::new("slow").callback(|_| {}))
            .expect("publish");

        assert!(connection.cancel(&publication));
        assert!(!connection.cancel(&publication));
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_expire_after() {
        let (connection, _server) = pair().await;
        connection
            .publish(
                PublishOptions::new("slow")
                    .callback(|_| {})
                    .expire_after(Duration::from_millis(20)),
            )
            .expect("publish");
        assert_eq!(connection.reactor().pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_receives_reply() {
        let (connection, mut server) = pair().await;

        let responder = tokio::spawn(async move {
            let request = next_envelope(&mut server).await;
            let reply = Envelope::new(request.event.clone(), json!({ "echo": request.data }))
                .expect("valid")
                .with_correlation(request.timestamp.expect("timestamp"));
            server
                .send(Message::Text(reply.to_frame().expect("frame").into()))
                .await
                .expect("server send");
            server
        });

        let reply = connection
            .request("chat/echo", json!({ "n": 1 }), WAIT)
            .await
            .expect("reply");

        assert_eq!(reply, json!({ "echo": { "n": 1 } }));
        assert_eq!(connection.reactor().pending_count(), 0);
        drop(responder.await.expect("responder"));
    }

    #[tokio::test]
    async fn test_request_timeout_cancels_registration() {
        let (connection, _server) = pair().await;

        let err = connection
            .request("chat/silent", json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::RequestTimeout { ref event, .. } if event == "chat/silent"));
        assert_eq!(connection.reactor().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_keeps_reply_sent_just_before_close() {
        for _ in 0..20 {
            let (connection, mut server) = pair().await;

            let responder = tokio::spawn(async move {
                let request = next_envelope(&mut server).await;
                let reply = Envelope::new(request.event.clone(), json!({ "last": true }))
                    .expect("valid")
                    .with_correlation(request.timestamp.expect("timestamp"));
                server
                    .feed(Message::Text(reply.to_frame().expect("frame").into()))
                    .await
                    .expect("server feed");
                server.close(None).await.expect("close");
            });

            let reply = connection
                .request("chat/bye", json!({}), WAIT)
                .await
                .expect("reply delivered before close");

            assert_eq!(reply, json!({ "last": true }));
            responder.await.expect("responder");
            connection.wait_closed().await;
        }
    }

    #[tokio::test]
    async fn test_request_fails_when_connection_drops() {
        let (connection, mut server) = pair().await;

        let closer = tokio::spawn(async move {
            let _ = next_envelope(&mut server).await;
            server.close(None).await.expect("close");
        });

        let err = connection
            .request("chat/ping", json!({}), WAIT)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ConnectionClosed));
        assert_eq!(connection.reactor().pending_count(), 0);
        closer.await.expect("closer");
    }
}
