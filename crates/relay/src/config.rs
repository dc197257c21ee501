use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::proxy::ProxyConfig;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Hosts that failed over HTTP/2 stay on HTTP/1.1 for this long.
pub const DEFAULT_HTTP2_FAILURE_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Client-wide transport settings and per-request defaults
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Default overall timeout for a single request attempt
    pub timeout: Duration,

    /// Connection timeout (time to establish initial connection)
    pub connect_timeout: Duration,

    /// Read timeout (maximum time between receiving data chunks)
    pub read_timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Headers sent with every request unless overridden per request
    pub headers: HeaderMap,

    /// Proxy configuration (optional)
    pub proxy: Option<ProxyConfig>,

    /// Attempt HTTP/2 for https URLs before falling back to HTTP/1.1
    pub http2_enabled: bool,

    /// How long a host stays in the HTTP/2-failed set
    pub http2_failure_ttl: Duration,

    pub max_redirects: usize,

    /// Retries after the first attempt for retryable network errors
    pub max_retries: u32,

    /// Fresh egress addresses tried after a 429 before giving up
    pub max_rate_limit_retries: u32,

    /// Base of the exponential retry backoff
    pub retry_base_delay: Duration,

    /// Upper bound for buffered response bodies
    pub max_response_bytes: u64,

    pub pool_max_idle_per_host: usize,

    /// Pooled clients kept at once, one per protocol and egress address
    pub client_cache_capacity: u64,

    /// Cached clients unused for this long are dropped
    pub client_idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: TransportConfig::get_default_headers(),
            proxy: None,
            http2_enabled: true,
            http2_failure_ttl: DEFAULT_HTTP2_FAILURE_TTL,
            max_redirects: 5,
            max_retries: 3,
            max_rate_limit_retries: 3,
            retry_base_delay: Duration::from_millis(100),
            max_response_bytes: 50 * 1024 * 1024,
            pool_max_idle_per_host: 5,
            client_cache_capacity: 256,
            client_idle_timeout: Duration::from_secs(10 * 60),
        }
    }
}

impl TransportConfig {
    pub fn builder() -> crate::builder::TransportConfigBuilder {
        crate::builder::TransportConfigBuilder::new()
    }

    pub fn get_default_headers() -> HeaderMap {
        let mut default_headers = HeaderMap::new();

        default_headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            HeaderValue::from_static("gzip, deflate, br"),
        );

        default_headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));

        default_headers.insert(
            reqwest::header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("en-US,en;q=0.9"),
        );
        default_headers
    }
}
