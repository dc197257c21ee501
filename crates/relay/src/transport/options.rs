use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use flate2::{Compression, write::GzEncoder};
use reqwest::Method;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use super::TransportError;
use crate::TransportConfig;

/// Payload attached to an outbound request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Bytes {
        data: Bytes,
        content_type: Option<String>,
    },
    Text(String),
}

impl RequestBody {
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self, TransportError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| TransportError::InvalidRequest(format!("unserializable JSON body: {e}")))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Per-request options. Anything left as `None` falls back to the
/// [`TransportConfig`] defaults.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub timeout: Option<Duration>,
    pub max_redirects: Option<usize>,
    pub max_retries: Option<u32>,
    /// Hand back the decompressed byte stream instead of buffering it.
    pub streaming: bool,
    /// Gzip the request body. Some upstreams reject compressed bodies.
    pub compress_body: bool,
    pub max_response_bytes: Option<u64>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            timeout: None,
            max_redirects: None,
            max_retries: None,
            streaming: false,
            compress_body: true,
            max_response_bytes: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: RequestBody) -> Self {
        Self {
            method: Method::POST,
            body,
            ..Self::default()
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn without_body_compression(mut self) -> Self {
        self.compress_body = false;
        self
    }

    pub fn with_max_response_bytes(mut self, limit: u64) -> Self {
        self.max_response_bytes = Some(limit);
        self
    }

    /// Resolve defaults and check the options are usable.
    pub(crate) fn resolve(&self, config: &TransportConfig) -> Result<ResolvedOptions, TransportError> {
        let timeout = self.timeout.unwrap_or(config.timeout);
        if timeout.is_zero() {
            return Err(TransportError::InvalidRequest("timeout must be non-zero".into()));
        }
        let max_response_bytes = self.max_response_bytes.unwrap_or(config.max_response_bytes);
        if max_response_bytes == 0 {
            return Err(TransportError::InvalidRequest(
                "max_response_bytes must be non-zero".into(),
            ));
        }
        if !self.body.is_empty() && matches!(self.method, Method::GET | Method::HEAD) {
            return Err(TransportError::InvalidRequest(format!(
                "{} requests cannot carry a body",
                self.method
            )));
        }

        Ok(ResolvedOptions {
            timeout,
            max_redirects: self.max_redirects.unwrap_or(config.max_redirects),
            max_retries: self.max_retries.unwrap_or(config.max_retries),
            max_response_bytes,
        })
    }

    /// Serialize the body and add the matching content headers.
    pub(crate) fn encode_body(
        &self,
        headers: &mut HeaderMap,
    ) -> Result<Option<Bytes>, TransportError> {
        let (data, content_type) = match &self.body {
            RequestBody::Empty => return Ok(None),
            RequestBody::Json(value) => {
                let data = serde_json::to_vec(value).map_err(|e| {
                    TransportError::InvalidRequest(format!("unserializable JSON body: {e}"))
                })?;
                (Bytes::from(data), Some("application/json".to_string()))
            }
            RequestBody::Bytes { data, content_type } => (data.clone(), content_type.clone()),
            RequestBody::Text(text) => (
                Bytes::from(text.clone()),
                Some("text/plain; charset=utf-8".to_string()),
            ),
        };

        if let Some(content_type) = content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            let value = HeaderValue::from_str(&content_type)
                .map_err(|e| TransportError::InvalidRequest(format!("bad content type: {e}")))?;
            headers.insert(CONTENT_TYPE, value);
        }

        if !self.compress_body || data.is_empty() {
            return Ok(Some(data));
        }

        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder
            .write_all(&data)
            .and_then(|_| encoder.finish())
            .map(|compressed| {
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                Some(Bytes::from(compressed))
            })
            .map_err(|e| TransportError::InvalidRequest(format!("failed to gzip body: {e}")))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ResolvedOptions {
    pub timeout: Duration,
    pub max_redirects: usize,
    pub max_retries: u32,
    pub max_response_bytes: u64,
}
