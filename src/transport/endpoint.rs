//! WebSocket endpoint derivation.
//!
//! The server exposes its socket under a fixed path next to the page that
//! hosts the client. The endpoint is the page location with the scheme
//! upgraded to its streaming equivalent:
//!
//! | Page | Endpoint |
//! |------|----------|
//! | `http://host/` | `ws://host/ws_connection` |
//! | `https://host/chat/` | `wss://host/chat/ws_connection` |

// ============================================================================
// Imports
// ============================================================================

use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Well-known socket path.
pub const DEFAULT_ENDPOINT_PATH: &str = "ws_connection";

// ============================================================================
// Functions
// ============================================================================

/// Derives the WebSocket URL from a page URL.
///
/// Query and fragment are dropped; `path` is appended to the page path.
///
/// # Errors
///
/// - [`Error::Url`] if `page_url` does not parse
/// - [`Error::Config`] if the scheme has no streaming equivalent or `path`
///   is empty
pub fn ws_url(page_url: &str, path: &str) -> Result<Url> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return Err(Error::config("endpoint path must not be empty"));
    }

    let mut url = Url::parse(page_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::config(format!(
                "cannot derive a WebSocket endpoint from a {other} URL"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::config(format!("cannot switch {page_url} to {scheme}")))?;
    url.set_query(None);
    url.set_fragment(None);

    let mut full_path = url.path().to_string();
    if !full_path.ends_with('/') {
        full_path.push('/');
    }
    full_path.push_str(path);
    url.set_path(&full_path);

    Ok(url)
}

// ============================================================================
// Tests
// ============================================================================
