//! Client configuration.
//!
//! Provides a type-safe configuration for the connection endpoint and the
//! timeouts used by the awaitable helpers.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use meteor_client::ClientConfig;
//!
//! let config = ClientConfig::builder()
//!     .page_url("http://localhost:8888/")
//!     .request_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! assert_eq!(config.ws_url()?.as_str(), "ws://localhost:8888/ws_connection");
//! ```
//!
//! The same configuration can be read from JSON. Unknown fields are
//! rejected:
//!
//! ```json
//! { "page_url": "http://localhost:8888/", "reply_expiry_ms": 60000 }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::endpoint::{DEFAULT_ENDPOINT_PATH, ws_url};

// ============================================================================
// Constants
// ============================================================================

/// Default timeout for `wait_ready` and `request` (30s).
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_endpoint_path() -> String {
    DEFAULT_ENDPOINT_PATH.to_string()
}

const fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Connection and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Location of the hosting page; the endpoint is derived from it.
    pub page_url: String,

    /// Well-known socket path appended to the page path.
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,

    /// How long `wait_ready` waits, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// How long `request` waits for a reply, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Default lifetime of one-shot reply registrations, in milliseconds.
    ///
    /// `None` keeps unanswered registrations until the process ends.
    #[serde(default)]
    pub reply_expiry_ms: Option<u64>,
}

// ============================================================================
// Constructors
// ============================================================================

impl ClientConfig {
    /// Creates a configuration with default settings for `page_url`.
    ///
    /// Not validated; see [`ClientConfig::validate`].
    #[must_use]
    pub fn new(page_url: impl Into<String>) -> Self {
        Self {
            page_url: page_url.into(),
            endpoint_path: default_endpoint_path(),
            ready_timeout_ms: DEFAULT_TIMEOUT_MS,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            reply_expiry_ms: None,
        }
    }

    /// Creates a new builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Json`] if the text is malformed or has unknown fields
    /// - [`Error::Config`] if validation fails
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl ClientConfig {
    /// Returns the derived WebSocket endpoint.
    ///
    /// # Errors
    ///
    /// See [`ws_url`].
    pub fn ws_url(&self) -> Result<Url> {
        ws_url(&self.page_url, &self.endpoint_path)
    }

    /// Returns the ready timeout.
    #[inline]
    #[must_use]
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Returns the request timeout.
    #[inline]
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the default reply registration lifetime.
    #[inline]
    #[must_use]
    pub fn reply_expiry(&self) -> Option<Duration> {
        self.reply_expiry_ms.map(Duration::from_millis)
    }

    /// Checks that the endpoint derives and every timeout is non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] (or [`Error::Url`]) describing the first
    /// problem found.
    pub fn validate(&self) -> Result<()> {
        self.ws_url()?;

        if self.ready_timeout_ms == 0 {
            return Err(Error::config("ready_timeout_ms must be greater than zero"));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::config("request_timeout_ms must be greater than zero"));
        }
        if self.reply_expiry_ms == Some(0) {
            return Err(Error::config("reply_expiry_ms must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// ClientConfigBuilder
// ============================================================================

/// Builder for [`ClientConfig`].
#[derive(Debug, Default, Clone)]
pub struct ClientConfigBuilder {
    page_url: Option<String>,
    endpoint_path: Option<String>,
    ready_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    reply_expiry: Option<Duration>,
}

impl ClientConfigBuilder {
    /// Sets the hosting page location.
    #[inline]
    #[must_use]
    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    /// Overrides the socket path (default `ws_connection`).
    #[inline]
    #[must_use]
    pub fn endpoint_path(mut self, path: impl Into<String>) -> Self {
        self.endpoint_path = Some(path.into());
        self
    }

    /// Sets the ready timeout.
    #[inline]
    #[must_use]
    pub fn ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    /// Sets the request timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the default reply registration lifetime.
    #[inline]
    #[must_use]
    pub fn reply_expiry(mut self, expiry: Duration) -> Self {
        self.reply_expiry = Some(expiry);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the page URL is not set or a value is invalid
    /// - [`Error::Url`] if the page URL does not parse
    pub fn build(self) -> Result<ClientConfig> {
        let page_url = self
            .page_url
            .ok_or_else(|| Error::config("page URL is required"))?;

        let mut config = ClientConfig::new(page_url);
        if let Some(path) = self.endpoint_path {
            config.endpoint_path = path;
        }
        if let Some(timeout) = self.ready_timeout {
            config.ready_timeout_ms = timeout.as_millis() as u64;
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout_ms = timeout.as_millis() as u64;
        }
        config.reply_expiry_ms = self.reply_expiry.map(|expiry| expiry.as_millis() as u64);

        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://localhost:8888/");
        assert_eq!(config.endpoint_path, "ws_connection");
        assert_eq!(config.ready_timeout(), Duration::from_secs(30));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.reply_expiry(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::builder()
            .page_url("https://example.com/chat/")
            .request_timeout(Duration::from_secs(5))
            .reply_expiry(Duration::from_secs(60))
            .build()
            .expect("valid config");

        assert_eq!(config.request_timeout_ms, 5_000);
        assert_eq!(config.reply_expiry(), Some(Duration::from_secs(60)));
        assert_eq!(
            config.ws_url().expect("url").as_str(),
            "wss://example.com/chat/ws_connection"
        );
    }

    #[test]
    fn test_builder_requires_page_url() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let err = ClientConfig::builder()
            .page_url("http://localhost/")
            .ready_timeout(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_builder_rejects_bad_scheme() {
        let err = ClientConfig::builder()
            .page_url("file:///tmp/index.html")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_json() {
        let config = ClientConfig::from_json(
            r#"{ "page_url": "http://localhost:8888/", "reply_expiry_ms": 60000 }"#,
        )
        .expect("valid json config");

        assert_eq!(config.endpoint_path, "ws_connection");
        assert_eq!(config.ready_timeout_ms, 30_000);
        assert_eq!(config.reply_expiry(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let err = ClientConfig::from_json(
            r#"{ "page_url": "http://localhost:8888/", "autosend": false }"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_from_json_validates() {
        let err = ClientConfig::from_json(r#"{ "page_url": "http://localhost/", "reply_expiry_ms": 0 }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
