//! Meteor client - event reactor over a single WebSocket connection.
//!
//! This library lets application code subscribe to server-pushed events,
//! publish events that optionally expect a correlated reply, and defer work
//! until the connection is ready.
//!
//! # Architecture
//!
//! The client follows a reactor model:
//!
//! - **Connection**: owns the socket, the ready flag and the deferred
//!   callback queue; an event loop task does all I/O
//! - **Reactor**: registry of `event name → correlation key → callback`
//! - **Publish**: builds an envelope, registers its reply callback, sends it
//!
//! Key design principles:
//!
//! - One connection per [`Meteor`] handle, passed explicitly to the code that
//!   needs it
//! - Standing subscriptions use [`CorrelationKey::Default`]; replies use a
//!   time-derived [`CorrelationId`] carried as the frame's `timestamp`
//! - A reply consumes its one-shot registration; unmatched events are dropped
//!
//! # Quick Start
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
//!     meteor.subscribe("chat/new_message", |data| {
//!         println!("[{}]: {}", data["user"], data["msg"]);
//!     });
//!
//!     meteor.wait_ready().await?;
//!     meteor.publish(PublishOptions::new("chat/new_message").data(json!({ "msg": "hi" })))?;
//!
//!     let history = meteor.request("chat/history", json!({})).await?;
//!     println!("{history}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Meteor`] context handle |
//! | [`config`] | [`ClientConfig`] and its builder |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | [`CorrelationId`] and [`CorrelationKey`] |
//! | [`protocol`] | [`Envelope`] wire frame |
//! | [`publish`] | [`PublishOptions`] and [`Publication`] |
//! | [`reactor`] | [`Reactor`] event registry |
//! | [`transport`] | WebSocket connection and ready gate |

// ============================================================================
// Modules
// ============================================================================

/// Meteor context handle.
pub mod client;

/// Client configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Correlation identifiers.
pub mod identifiers;

/// WebSocket protocol message types.
pub mod protocol;

/// Envelope builder.
pub mod publish;

/// Event registry.
pub mod reactor;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::Meteor;
pub use config::{ClientConfig, ClientConfigBuilder};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CorrelationId, CorrelationKey};

// Protocol types
pub use protocol::Envelope;

// Publish types
pub use publish::{Publication, PublishOptions};

// Reactor types
pub use reactor::{EventCallback, Reactor, Subscription};

// Transport types
pub use transport::{Connection, ConnectionState, DisconnectReason};
