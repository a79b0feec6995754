//! WebSocket protocol message types.
//!
//! Both directions carry the same frame shape, an [`Envelope`]:
//!
//! | Field | Type | Required |
//! |-------|------|----------|
//! | `event` | string | yes |
//! | `data` | object | yes, may be `{}` |
//! | `timestamp` | number | only for one-shot reply correlation |
//!
//! Event names are free-form; server packages namespace theirs as
//! `package/event` (e.g. `chat/new_message`).

// ============================================================================
// Submodules
// ============================================================================

/// Envelope frame type.
pub mod envelope;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{Envelope, empty_payload};
