//! Meteor client context.
//!
//! [`Meteor`] bundles the one connection, its registry and the
//! configuration into an explicitly constructed handle. Code that needs to
//! publish or subscribe receives a clone of it; there is no global instance.
//!
//! # Example
//!
//! ```no_run
//! use meteor_client::{ClientConfig, Meteor, PublishOptions, Result};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ClientConfig::builder().page_url("http://localhost:8888/").build()?;
//!     let meteor = Meteor::connect(config)?;
//!
//!     meteor.subscribe("user_enter", |data| println!("joined: {}", data["user"]));
//!
//!     let handle = meteor.clone();
//!     meteor.on_ready(move || {
//!         let _ = handle.publish(
//!             PublishOptions::new("chat/new_message").data(json!({ "msg": "hello" })),
//!         );
//!     });
//!
//!     meteor.wait_ready().await?;
//!     Ok(())
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::protocol::Envelope;
use crate::publish::{Publication, PublishOptions};
use crate::reactor::{Reactor, Subscription};
use crate::transport::{Connection, ConnectionState, DisconnectReason};

// ============================================================================
// Meteor
// ============================================================================

/// Handle to a connection and its event registry.
///
/// Cheap to clone; clones share everything.
#[derive(Debug, Clone)]
pub struct Meteor {
    connection: Connection,
    config: Arc<ClientConfig>,
}

// ============================================================================
// Meteor - Constructors
// ============================================================================

impl Meteor {
    /// Starts connecting to the endpoint derived from `config`.
    ///
    /// Returns immediately; use [`Meteor::on_ready`] or
    /// [`Meteor::wait_ready`] to run work once connected.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Config`] if the configuration is invalid or no
    ///   tokio runtime is running
    /// - [`crate::Error::Url`] if the page URL does not parse
    pub fn connect(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let url = config.ws_url()?;

        info!(%url, "Starting Meteor client");

        let connection = Connection::connect(url, Reactor::new())?;
        Ok(Self {
            connection,
            config: Arc::new(config),
        })
    }

    /// Wraps an already open WebSocket stream.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the configuration is invalid or
    /// no tokio runtime is running.
    pub fn from_stream<S>(ws_stream: WebSocketStream<S>, config: ClientConfig) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        config.validate()?;
        let connection = Connection::from_stream(ws_stream, Reactor::new())?;
        Ok(Self {
            connection,
            config: Arc::new(config),
        })
    }
}

// ============================================================================
// Meteor - Accessors
// ============================================================================

impl Meteor {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the event registry.
    #[inline]
    #[must_use]
    pub fn reactor(&self) -> &Reactor {
        self.connection.reactor()
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns `true` once connected and not yet lost.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.connection.is_ready()
    }
}

// ============================================================================
// Meteor - Lifecycle
// ============================================================================

impl Meteor {
    /// Runs `callback` once connected; immediately if already connected.
    #[inline]
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.connection.on_ready(callback);
    }

    /// Runs `callback` once the connection is lost.
    #[inline]
    pub fn on_lost<F>(&self, callback: F)
    where
        F: FnOnce(&DisconnectReason) + Send + 'static,
    {
        self.connection.on_lost(callback);
    }

    /// Waits for the connection using the configured ready timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::wait_ready`].
    pub async fn wait_ready(&self) -> Result<()> {
        self.connection.wait_ready(self.config.ready_timeout()).await
    }

    /// Waits until the connection is lost.
    pub async fn wait_closed(&self) -> DisconnectReason {
        self.connection.wait_closed().await
    }

    /// Closes the connection.
    #[inline]
    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

// ============================================================================
// Meteor - Events
// ============================================================================

impl Meteor {
    /// Stores a callback in the registry.
    ///
    /// See [`Reactor::add_event`].
    #[inline]
    pub fn add_event(&self, subscription: Subscription) -> bool {
        self.reactor().add_event(subscription)
    }

    /// Registers a standing subscription for `name`.
    #[inline]
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F) -> bool
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.reactor().subscribe(name, callback)
    }

    /// Publishes an event, applying the configured reply expiry when the
    /// options set none.
    ///
    /// # Errors
    ///
    /// See [`Connection::publish`].
    pub fn publish(&self, mut options: PublishOptions) -> Result<Publication> {
        if options.expire_after.is_none() {
            options.expire_after = self.config.reply_expiry();
        }
        self.connection.publish(options)
    }

    /// Sends a prebuilt envelope.
    ///
    /// # Errors
    ///
    /// See [`Connection::send`].
    #[inline]
    pub fn send(&self, envelope: &Envelope) -> Result<()> {
        self.connection.send(envelope)
    }

    /// Drops the pending reply registration of `publication`.
    #[inline]
    pub fn cancel(&self, publication: &Publication) -> bool {
        self.connection.cancel(publication)
    }

    /// Publishes `name` and waits for the reply using the configured request
    /// timeout.
    ///
    /// # Errors
    ///
    /// See [`Connection::request`].
    pub async fn request(&self, name: impl Into<String>, data: Value) -> Result<Value> {
        self.connection
            .request(name, data, self.config.request_timeout())
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================
