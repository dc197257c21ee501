//! # Transport
//!
//! Unified outbound request execution shared by every adapter.
//!
//! A request goes through four layers, outermost first:
//!
//! 1. an explicit redirect loop bounded by `max_redirects`,
//! 2. egress selection through the [`RoutePlanner`], re-dispatching on 429,
//! 3. protocol selection: HTTP/2 for https hosts not known to fail it, with a
//!    one-time fallback to HTTP/1.1 that is remembered per host,
//! 4. HTTP/1.1 attempts retried with exponential backoff on transient errors.

mod error;
mod executor;
mod host_compat;
mod options;
mod redirect;
mod response;
mod retry;

pub use error::{NetworkError, NetworkErrorKind, TransportError};
pub use executor::{
    BodyStream, HttpExecutor, HttpProtocol, OutboundRequest, RawResponse, ReqwestExecutor,
    create_client,
};
pub use host_compat::{HostCompatibility, Http2FailureCache};
pub use options::{RequestBody, RequestOptions};
pub use response::{ResponseBody, TransportResponse};
pub use retry::RetryPolicy;

#[cfg(test)]
pub(crate) use executor::mock;

use std::net::IpAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap};
use reqwest::{Method, StatusCode};
use tokio::time::Instant;
use tracing::{debug, error, warn};
use url::Url;

use crate::{TransportConfig, route_planner::RoutePlanner};
use options::ResolvedOptions;

/// Request state that survives across attempts and is rewritten by redirects.
struct PreparedRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    streaming: bool,
    limits: ResolvedOptions,
}

impl PreparedRequest {
    fn outbound(&self, protocol: HttpProtocol, local_address: Option<IpAddr>) -> OutboundRequest {
        OutboundRequest {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            protocol,
            local_address,
        }
    }
}

/// Outcome of one attempt that did not produce a response.
enum AttemptError {
    /// Wire-level failure, eligible for fallback or retry.
    Network(NetworkError),
    /// The exchange worked but the result is unusable.
    Fatal(TransportError),
}

enum BodyError {
    TooLarge,
    Network(NetworkError),
}

pub struct Transport {
    config: TransportConfig,
    executor: Arc<dyn HttpExecutor>,
    host_compat: Arc<dyn HostCompatibility>,
    route_planner: Option<Arc<RoutePlanner>>,
}

impl Transport {
    /// Transport backed by reqwest with a fresh HTTP/2 failure cache.
    pub fn new(config: TransportConfig) -> Self {
        let executor = Arc::new(ReqwestExecutor::new(config.clone()));
        let host_compat = Arc::new(Http2FailureCache::new(config.http2_failure_ttl));
        Self {
            config,
            executor,
            host_compat,
            route_planner: None,
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn HttpExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_host_compatibility(mut self, host_compat: Arc<dyn HostCompatibility>) -> Self {
        self.host_compat = host_compat;
        self
    }

    pub fn with_route_planner(mut self, route_planner: Arc<RoutePlanner>) -> Self {
        self.route_planner = Some(route_planner);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn route_planner(&self) -> Option<&Arc<RoutePlanner>> {
        self.route_planner.as_ref()
    }

    pub fn host_compatibility(&self) -> &Arc<dyn HostCompatibility> {
        &self.host_compat
    }

    /// Plain buffered GET with default options.
    pub async fn get(&self, url: &str) -> Result<TransportResponse, TransportError> {
        self.request(url, RequestOptions::default()).await
    }

    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        let limits = options.resolve(&self.config)?;
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(TransportError::InvalidUrl(format!(
                "{url}: only absolute http(s) URLs are supported"
            )));
        }

        let mut headers = self.config.headers.clone();
        headers.extend(options.headers.clone());
        let body = options.encode_body(&mut headers)?;

        let mut request = PreparedRequest {
            method: options.method.clone(),
            url,
            headers,
            body,
            streaming: options.streaming,
            limits,
        };
        let origin = request.url.clone();
        let mut redirects = 0usize;

        loop {
            let response = self.dispatch(&request).await?;
            if !redirect::should_follow(response.status, &response.headers) {
                return Ok(response);
            }

            if redirects >= limits.max_redirects {
                warn!(url = %origin, max = limits.max_redirects, "Redirect limit exceeded");
                return Err(TransportError::RedirectLimitExceeded {
                    url: origin.to_string(),
                    max: limits.max_redirects,
                });
            }

            let next = redirect::next_location(&request.url, &response.headers)?;
            let (method, keep_body) = redirect::redirect_method(response.status, &request.method);
            debug!(
                from = %request.url,
                to = %next,
                status = response.status.as_u16(),
                method = %method,
                "Following redirect"
            );
            redirect::strip_headers(&mut request.headers, keep_body, &request.url, &next);
            if !keep_body {
                request.body = None;
            }
            request.method = method;
            request.url = next;
            redirects += 1;
        }
    }

    /// One hop: pick an egress address and re-dispatch on 429 while the
    /// planner has fresh addresses to offer.
    async fn dispatch(&self, request: &PreparedRequest) -> Result<TransportResponse, TransportError> {
        let mut rate_limited = 0u32;
        loop {
            let local_address = self.next_address()?;
            let (response, used_address) = self.send(request, local_address).await?;

            if response.status != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            let (Some(planner), Some(address)) = (&self.route_planner, used_address) else {
                return Ok(response);
            };

            planner.ban_ip(address);
            rate_limited += 1;
            warn!(
                url = %request.url,
                address = %address,
                attempt = rate_limited,
                "Upstream rate limited egress address"
            );
            if rate_limited > self.config.max_rate_limit_retries {
                return Err(TransportError::UpstreamRateLimited {
                    url: request.url.to_string(),
                    attempts: rate_limited,
                });
            }
        }
    }

    fn next_address(&self) -> Result<Option<IpAddr>, TransportError> {
        match &self.route_planner {
            Some(planner) => Ok(Some(planner.get_ip()?)),
            None => Ok(None),
        }
    }

    /// Swap out `address` if it was banned while we were waiting.
    fn revalidate(&self, address: Option<IpAddr>) -> Result<Option<IpAddr>, TransportError> {
        match (&self.route_planner, address) {
            (Some(planner), Some(current)) if planner.is_banned(&current) => {
                debug!(address = %current, "Egress address banned meanwhile, picking another");
                Ok(Some(planner.get_ip()?))
            }
            _ => Ok(address),
        }
    }

    /// Protocol selection and HTTP/1.1 retries. Returns the response and the
    /// egress address that produced it.
    async fn send(
        &self,
        request: &PreparedRequest,
        mut local_address: Option<IpAddr>,
    ) -> Result<(TransportResponse, Option<IpAddr>), TransportError> {
        let host = request.url.host_str().unwrap_or_default().to_ascii_lowercase();
        let try_http2 = self.config.http2_enabled
            && request.url.scheme() == "https"
            && !self.host_compat.has(&host);

        if try_http2 {
            match self.attempt(request, HttpProtocol::Http2, local_address).await {
                Ok(response) => return Ok((response, local_address)),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Network(e)) => {
                    let fallback = TransportError::ProtocolFallback {
                        host: host.clone(),
                        reason: e.to_string(),
                    };
                    warn!(error = %fallback, "Falling back to HTTP/1.1");
                    self.host_compat.add(&host);
                }
            }
        }

        let policy = RetryPolicy::new(request.limits.max_retries, self.config.retry_base_delay);
        let mut retries = 0u32;
        loop {
            local_address = self.revalidate(local_address)?;
            match self.attempt(request, HttpProtocol::Http1, local_address).await {
                Ok(response) => return Ok((response, local_address)),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Network(e)) if e.is_retryable() && policy.should_retry(retries) => {
                    let delay = policy.delay(retries);
                    retries += 1;
                    warn!(
                        url = %request.url,
                        attempt = retries,
                        max_retries = policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient network error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(AttemptError::Network(e)) => {
                    let attempts = retries + 1;
                    error!(url = %request.url, attempts, error = %e, "Request failed");
                    return Err(if e.kind == NetworkErrorKind::TimedOut {
                        TransportError::Timeout {
                            url: request.url.to_string(),
                            timeout: request.limits.timeout,
                            attempts,
                        }
                    } else {
                        TransportError::Network {
                            url: request.url.to_string(),
                            attempts,
                            source: e,
                        }
                    });
                }
            }
        }
    }

    /// A single exchange over `protocol`, bounded by the request timeout.
    async fn attempt(
        &self,
        request: &PreparedRequest,
        protocol: HttpProtocol,
        local_address: Option<IpAddr>,
    ) -> Result<TransportResponse, AttemptError> {
        let timeout = request.limits.timeout;
        let deadline = Instant::now() + timeout;
        debug!(
            method = %request.method,
            url = %request.url,
            %protocol,
            local_address = ?local_address,
            "Dispatching request"
        );

        let raw = match tokio::time::timeout_at(
            deadline,
            self.executor.execute(request.outbound(protocol, local_address)),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(AttemptError::Network(e)),
            Err(_) => return Err(AttemptError::Network(NetworkError::timed_out(timeout))),
        };

        let RawResponse {
            status,
            headers,
            version,
            body,
        } = raw;
        let mut response = TransportResponse {
            status,
            headers,
            version,
            url: request.url.clone(),
            body: ResponseBody::Buffered(Bytes::new()),
        };

        // Followed redirect and rate-limit bodies are never handed to the caller.
        if redirect::should_follow(status, &response.headers)
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            return Ok(response);
        }
        if request.streaming {
            response.body = ResponseBody::Stream(body);
            return Ok(response);
        }

        let limit = request.limits.max_response_bytes;
        let too_large = || {
            AttemptError::Fatal(TransportError::ResponseTooLarge {
                url: request.url.to_string(),
                limit,
            })
        };
        let declared = response
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit) {
            return Err(too_large());
        }

        match tokio::time::timeout_at(deadline, collect_body(body, limit)).await {
            Ok(Ok(bytes)) => {
                response.body = ResponseBody::Buffered(bytes);
                Ok(response)
            }
            Ok(Err(BodyError::TooLarge)) => Err(too_large()),
            Ok(Err(BodyError::Network(e))) => Err(AttemptError::Network(e)),
            Err(_) => Err(AttemptError::Network(NetworkError::timed_out(timeout))),
        }
    }
}

async fn collect_body(mut body: BodyStream, limit: u64) -> Result<Bytes, BodyError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(BodyError::Network)?;
        if buffer.len() as u64 + chunk.len() as u64 > limit {
            return Err(BodyError::TooLarge);
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}
