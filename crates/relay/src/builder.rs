//! # Builder for TransportConfig
//!
//! Fluent construction of [`TransportConfig`] instances.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use relay_engine::TransportConfig;
//! use relay_engine::proxy::{ProxyAuth, ProxyConfig, ProxyType};
//!
//! let config = TransportConfig::builder()
//!     .with_timeout(Duration::from_secs(60))
//!     .with_connect_timeout(Duration::from_secs(15))
//!     .with_user_agent("MyApp/1.0")
//!     .with_header("X-Api-Key", "my-secret-key")
//!     .with_max_retries(5)
//!     .build();
//!
//! let config_with_proxy = TransportConfig::builder()
//!     .with_proxy(ProxyConfig {
//!         url: "http://proxy.example.com:8080".to_string(),
//!         proxy_type: ProxyType::Http,
//!         auth: Some(ProxyAuth {
//!             username: "user".to_string(),
//!             password: "pass".to_string(),
//!         }),
//!     })
//!     .with_http2(false)
//!     .build();
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::{TransportConfig, proxy::ProxyConfig};

/// Builder for creating TransportConfig instances with a fluent API
#[derive(Debug, Clone)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl Default for TransportConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
        }
    }

    /// Set the default per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connection timeout (time to establish initial connection)
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the read timeout (maximum time between receiving data chunks)
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the user agent string
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Add a default HTTP header. Unparsable names or values are ignored.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.as_ref().parse::<reqwest::header::HeaderName>(),
            HeaderValue::from_str(value.as_ref()),
        ) {
            self.config.headers.insert(name, value);
        }
        self
    }

    /// Set all default HTTP headers, replacing any existing ones
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Enable or disable HTTP/2 attempts globally
    pub fn with_http2(mut self, enabled: bool) -> Self {
        self.config.http2_enabled = enabled;
        self
    }

    /// How long a host is remembered as HTTP/2-incompatible
    pub fn with_http2_failure_ttl(mut self, ttl: Duration) -> Self {
        self.config.http2_failure_ttl = ttl;
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    pub fn with_max_rate_limit_retries(mut self, retries: u32) -> Self {
        self.config.max_rate_limit_retries = retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn with_max_response_bytes(mut self, limit: u64) -> Self {
        self.config.max_response_bytes = limit;
        self
    }

    pub fn with_pool_max_idle_per_host(mut self, max_idle: usize) -> Self {
        self.config.pool_max_idle_per_host = max_idle;
        self
    }

    /// Bound the per-egress client cache and its idle lifetime
    pub fn with_client_cache(mut self, capacity: u64, idle_timeout: Duration) -> Self {
        self.config.client_cache_capacity = capacity;
        self.config.client_idle_timeout = idle_timeout;
        self
    }

    /// Build the final TransportConfig
    pub fn build(self) -> TransportConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = TransportConfigBuilder::new().build();
        let default_config = TransportConfig::default();

        assert_eq!(config.timeout, default_config.timeout);
        assert_eq!(config.connect_timeout, default_config.connect_timeout);
        assert_eq!(config.user_agent, default_config.user_agent);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_millis(100));
        assert_eq!(config.http2_failure_ttl, Duration::from_secs(21_600));
        assert!(config.http2_enabled);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_builder_custom_values() {
        let config = TransportConfigBuilder::new()
            .with_timeout(Duration::from_secs(60))
            .with_connect_timeout(Duration::from_secs(20))
            .with_user_agent("TestAgent/1.0")
            .with_http2(false)
            .with_max_redirects(2)
            .with_max_response_bytes(1024)
            .build();

        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.user_agent, "TestAgent/1.0");
        assert!(!config.http2_enabled);
        assert_eq!(config.max_redirects, 2);
        assert_eq!(config.max_response_bytes, 1024);
    }

    #[test]
    fn test_builder_with_headers() {
        let config = TransportConfigBuilder::new()
            .with_header("X-Custom-Header", "custom-value")
            .with_header("bad header", "ignored")
            .build();

        assert_eq!(
            config.headers.get("X-Custom-Header").unwrap(),
            "custom-value"
        );
        // Defaults are kept alongside custom headers.
        assert!(config.headers.contains_key(reqwest::header::ACCEPT_ENCODING));
        assert!(!config.headers.contains_key("bad header"));
    }
}
