//! Type-safe identifiers for registry entries.
//!
//! A registry entry is addressed by an event name plus a [`CorrelationKey`].
//! The key is either the standing [`CorrelationKey::Default`] subscription
//! or a one-shot [`CorrelationKey::Correlated`] id that travels on the wire
//! as the frame's `timestamp`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ============================================================================
// CorrelationId
// ============================================================================

/// Last id handed out by [`CorrelationId::generate`].
static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// One-shot correlation id derived from wall-clock time.
///
/// Milliseconds since the Unix epoch. Serialized as a bare JSON number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);

impl CorrelationId {
    /// Generates a fresh id from the current time.
    ///
    /// Ids are strictly increasing within a process: when the clock has not
    /// moved past the last issued id, the next one is `last + 1`.
    #[must_use]
    pub fn generate() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut last = LAST_ISSUED.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match LAST_ISSUED.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Self(next),
                Err(actual) => last = actual,
            }
        }
    }

    /// Wraps a raw millisecond value.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the raw millisecond value.
    #[inline]
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    #[inline]
    fn from(millis: u64) -> Self {
        Self(millis)
    }
}

// ============================================================================
// CorrelationKey
// ============================================================================

/// Second-level registry key under an event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CorrelationKey {
    /// Standing subscription, matched by frames without a `timestamp`.
    #[default]
    Default,
    /// One-shot reply registration.
    Correlated(CorrelationId),
}

impl CorrelationKey {
    /// Returns `true` for a one-shot key.
    #[inline]
    #[must_use]
    pub const fn is_correlated(&self) -> bool {
        matches!(self, Self::Correlated(_))
    }

    /// Returns the correlation id, if any.
    #[inline]
    #[must_use]
    pub const fn correlation_id(&self) -> Option<CorrelationId> {
        match self {
            Self::Default => None,
            Self::Correlated(id) => Some(*id),
        }
    }
}

impl From<Option<CorrelationId>> for CorrelationKey {
    #[inline]
    fn from(id: Option<CorrelationId>) -> Self {
        id.map_or(Self::Default, Self::Correlated)
    }
}

impl From<CorrelationId> for CorrelationKey {
    #[inline]
    fn from(id: CorrelationId) -> Self {
        Self::Correlated(id)
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Correlated(id) => write!(f, "{id}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
