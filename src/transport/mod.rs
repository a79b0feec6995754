//! WebSocket transport layer.
//!
//! This module owns the one duplex connection per process between the
//! client and the server's `ws_connection` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Meteor (Rust)  │                              │  Server         │
//! │                 │         WebSocket            │                 │
//! │  Connection     │◄────────────────────────────►│  ws_connection  │
//! │  → Reactor      │    {event, data, timestamp}  │  handler        │
//! │                 │                              │                 │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `endpoint::ws_url` - Derive the socket URL from the page URL
//! 2. `Connection::connect` - Spawn the handshake, state `Connecting`
//! 3. Handshake completes - state `Ready`, queued ready callbacks run
//! 4. `Connection::send` / inbound frames routed to the `Reactor`
//! 5. Remote close, error or `Connection::shutdown` - state `Closed`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `endpoint` | Endpoint URL derivation |
//! | `ready` | Ready flag and deferred callbacks |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub mod connection;

/// Endpoint URL derivation.
pub mod endpoint;

/// Connection state gate.
pub mod ready;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use endpoint::{DEFAULT_ENDPOINT_PATH, ws_url};
pub use ready::{ConnectionState, DisconnectReason, LostCallback, ReadyCallback, ReadyGate};
