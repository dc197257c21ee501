//! # Relay Engine
//!
//! Networking core for a media relay node.
//!
//! ## Features
//!
//! - Outbound HTTP transport with HTTP/2 to HTTP/1.1 fallback, bounded
//!   redirects, retries of transient failures and response size limits
//! - Egress route planning over local IP blocks, with bans for rate
//!   limited addresses
//! - HLS stream reconstruction: variant selection, concurrent segment
//!   downloads, AES-128 decryption and strictly ordered output
//! - An axum admin router for inspecting and resetting the route planner

pub mod admin;
pub mod builder;
pub mod config;
pub mod hls;
pub mod proxy;
pub mod route_planner;
pub mod transport;

pub use builder::TransportConfigBuilder;
pub use config::TransportConfig;
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};

pub use route_planner::{
    IpBlock, RoutePlanner, RoutePlannerConfig, RoutePlannerError, RoutePlannerStatus,
    RoutePlannerStrategy,
};

pub use transport::{
    RequestBody, RequestOptions, Transport, TransportError, TransportResponse, create_client,
};

pub use hls::{HlsConfig, HlsError, OutputSink, SinkEvent, SinkReader, StreamReconstructor};
