//! The wire seam: everything above this module is protocol-agnostic policy.

use std::fmt;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use moka::sync::Cache;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode, Version};
use rustls::ClientConfig;
use rustls::crypto::aws_lc_rs;
use rustls_platform_verifier::BuilderVerifierExt;
use tracing::{debug, info};
use url::Url;

use super::{NetworkError, NetworkErrorKind, TransportError};
use crate::{TransportConfig, proxy::build_proxy_from_config};

/// A response body as a stream of chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, NetworkError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpProtocol {
    Http1,
    Http2,
}

impl fmt::Display for HttpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http1 => f.write_str("HTTP/1.1"),
            Self::Http2 => f.write_str("HTTP/2"),
        }
    }
}

/// One request as it goes out on the wire.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub protocol: HttpProtocol,
    pub local_address: Option<IpAddr>,
}

/// Status line and headers, with the body still to be read.
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub version: Version,
    pub body: BodyStream,
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Performs a single HTTP exchange. Redirects, retries and protocol
/// selection are the caller's job.
#[async_trait]
pub trait HttpExecutor: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, NetworkError>;
}

/// Production executor backed by pooled reqwest clients.
///
/// Clients are cached per `(protocol, egress address)`. The cache is bounded
/// and drops clients that sit idle, since large IPv6 pools hand out a new
/// egress address on almost every request.
pub struct ReqwestExecutor {
    config: TransportConfig,
    clients: Cache<(HttpProtocol, Option<IpAddr>), Client>,
}

impl ReqwestExecutor {
    pub fn new(config: TransportConfig) -> Self {
        let clients = Cache::builder()
            .max_capacity(config.client_cache_capacity)
            .time_to_idle(config.client_idle_timeout)
            .build();
        Self { config, clients }
    }

    /// Pooled client for the protocol/egress pair, created on first use.
    fn client_for(
        &self,
        protocol: HttpProtocol,
        local_address: Option<IpAddr>,
    ) -> Result<Client, TransportError> {
        self.clients
            .try_get_with((protocol, local_address), || {
                create_client(&self.config, protocol, local_address)
            })
            .map_err(|e| (*e).clone())
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: OutboundRequest) -> Result<RawResponse, NetworkError> {
        let client = self
            .client_for(request.protocol, request.local_address)
            .map_err(|e| NetworkError::new(NetworkErrorKind::Other, e.to_string()))?;

        let mut builder = client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let version = response.version();
        let body = response.bytes_stream().map_err(NetworkError::from).boxed();

        Ok(RawResponse {
            status,
            headers,
            version,
            body,
        })
    }
}

/// Create a reqwest Client for one protocol and egress address.
pub fn create_client(
    config: &TransportConfig,
    protocol: HttpProtocol,
    local_address: Option<IpAddr>,
) -> Result<Client, TransportError> {
    let provider = Arc::new(aws_lc_rs::default_provider());

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Client(format!("TLS protocol versions: {e}")))?
        .with_platform_verifier()
        .map_err(|e| TransportError::Client(format!("TLS platform verifier: {e}")))?
        .with_no_client_auth();
    tls_config.alpn_protocols = match protocol {
        HttpProtocol::Http2 => vec![b"h2".to_vec()],
        HttpProtocol::Http1 => vec![b"http/1.1".to_vec()],
    };

    let mut client_builder = Client::builder()
        .pool_max_idle_per_host(config.pool_max_idle_per_host)
        .user_agent(&config.user_agent)
        .use_preconfigured_tls(tls_config)
        .redirect(reqwest::redirect::Policy::none())
        .local_address(local_address);

    client_builder = match protocol {
        HttpProtocol::Http2 => client_builder.http2_prior_knowledge(),
        HttpProtocol::Http1 => client_builder.http1_only(),
    };

    if !config.connect_timeout.is_zero() {
        client_builder = client_builder.connect_timeout(config.connect_timeout);
    }

    if !config.read_timeout.is_zero() {
        client_builder = client_builder.read_timeout(config.read_timeout);
    }

    if let Some(proxy_config) = &config.proxy {
        let proxy = build_proxy_from_config(proxy_config)?;
        client_builder = client_builder.proxy(proxy);
        info!(proxy_url = %proxy_config.url, %protocol, "Using configured proxy");
    } else {
        client_builder = client_builder.no_proxy();
    }

    debug!(%protocol, local_address = ?local_address, "Creating HTTP client");
    client_builder
        .build()
        .map_err(|e| TransportError::Client(e.to_string()))
}
