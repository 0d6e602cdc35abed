//! Options structures for sampling and transport configuration.

use std::collections::HashMap;
use std::time::Duration;

/// Sampling options forwarded with every completion request.
///
/// Every field is optional; the service applies its own defaults (and picks a
/// lower temperature on its own for search-backed queries) when a field is
/// absent, so the zero-value `Default` is the right starting point.
///
/// # Example
/// ```rust
/// use resonance_client::options::ModelOptions;
///
/// let options = ModelOptions::default()
///     .with_temperature(0.7)
///     .with_max_tokens(256);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelOptions {
    /// Temperature for sampling (0.0 - 2.0)
    pub temperature: Option<f32>,

    /// Top-p (nucleus) sampling parameter
    pub top_p: Option<f32>,

    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
}

impl ModelOptions {
    /// Set the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set top-p sampling parameter.
    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }

    /// Set maximum tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Transport configuration for the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    /// Base URL for API endpoints; defaults to the local development server.
    pub base_url: Option<String>,

    /// Request timeout. Left unset for streaming-heavy use, since a timeout
    /// also bounds the lifetime of an open chunk stream.
    pub timeout: Option<Duration>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Additional HTTP headers to include in requests
    pub extra_headers: Option<HashMap<String, String>>,
}

impl TransportOptions {
    /// Create transport options pointing at the given base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..Default::default()
        }
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the proxy URL.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Add a single extra header.
    pub fn with_header(mut self, key: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(key, value);
        self
    }
}
