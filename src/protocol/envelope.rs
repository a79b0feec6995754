//! Envelope wire frame.
//!
//! One JSON object per WebSocket text frame, identical in both directions.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::{CorrelationId, CorrelationKey};

// ============================================================================
// Envelope
// ============================================================================

/// A named message with payload and optional correlation id.
///
/// # Format
///
/// ```json
/// {
///   "event": "chat/new_message",
///   "data": { "msg": "hi" },
///   "timestamp": 1700000000123
/// }
/// ```
///
/// `timestamp` is present only when a one-shot reply is requested or is
/// being answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Event name, never empty.
    pub event: String,

    /// Payload object.
    #[serde(default = "empty_payload")]
    pub data: Value,

    /// One-shot correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<CorrelationId>,
}

impl Envelope {
    /// Creates an uncorrelated envelope.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `event` is empty.
    pub fn new(event: impl Into<String>, data: Value) -> Result<Self> {
        let event = event.into();
        if event.is_empty() {
            return Err(Error::invalid_argument("event name must not be empty"));
        }

        Ok(Self {
            event,
            data,
            timestamp: None,
        })
    }

    /// Attaches a correlation id.
    #[inline]
    #[must_use]
    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.timestamp = Some(id);
        self
    }

    /// Returns the registry key this envelope is matched under.
    #[inline]
    #[must_use]
    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::from(self.timestamp)
    }

    /// Serializes to a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the payload cannot be serialized.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is not a valid envelope
    /// - [`Error::Protocol`] if the event name is empty
    pub fn from_frame(text: &str) -> Result<Self> {
        let envelope: Self = serde_json::from_str(text)?;
        if envelope.event.is_empty() {
            return Err(Error::protocol("frame has an empty event name"));
        }
        Ok(envelope)
    }
}

/// The `{}` payload used when none is given.
#[inline]
#[must_use]
pub fn empty_payload() -> Value {
    Value::Object(Map::new())
}

// ============================================================================
// Tests
// ============================================================================
