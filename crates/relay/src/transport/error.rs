use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::route_planner::RoutePlannerError;

/// Coarse classification of a failed exchange with an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionReset,
    ConnectionAborted,
    ConnectionRefused,
    BrokenPipe,
    TimedOut,
    NetworkUnreachable,
    HostUnreachable,
    /// TLS, HTTP framing or other protocol-level failure.
    Protocol,
    Other,
}

impl NetworkErrorKind {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionReset
                | Self::ConnectionAborted
                | Self::BrokenPipe
                | Self::TimedOut
                | Self::NetworkUnreachable
                | Self::HostUnreachable
        )
    }

    pub fn from_io(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::ConnectionReset => Self::ConnectionReset,
            io::ErrorKind::ConnectionAborted => Self::ConnectionAborted,
            io::ErrorKind::ConnectionRefused => Self::ConnectionRefused,
            io::ErrorKind::BrokenPipe => Self::BrokenPipe,
            io::ErrorKind::TimedOut => Self::TimedOut,
            io::ErrorKind::NetworkUnreachable => Self::NetworkUnreachable,
            io::ErrorKind::HostUnreachable => Self::HostUnreachable,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Self::Protocol,
            _ => Self::Other,
        }
    }

    /// Walk the source chain of `err` looking for an I/O error kind.
    pub fn classify(err: &(dyn StdError + 'static)) -> Self {
        let mut current: Option<&(dyn StdError + 'static)> = Some(err);
        while let Some(e) = current {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                let kind = Self::from_io(io_err.kind());
                if kind != Self::Other {
                    return kind;
                }
            }
            if let Some(reqwest_err) = e.downcast_ref::<reqwest::Error>()
                && reqwest_err.is_timeout()
            {
                return Self::TimedOut;
            }
            current = e.source();
        }
        Self::Other
    }
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ConnectionReset => "connection reset",
            Self::ConnectionAborted => "connection aborted",
            Self::ConnectionRefused => "connection refused",
            Self::BrokenPipe => "broken pipe",
            Self::TimedOut => "timed out",
            Self::NetworkUnreachable => "network unreachable",
            Self::HostUnreachable => "host unreachable",
            Self::Protocol => "protocol error",
            Self::Other => "network error",
        };
        f.write_str(name)
    }
}

/// A single failed attempt, cheap to clone.
#[derive(Debug, Clone)]
pub struct NetworkError {
    pub kind: NetworkErrorKind,
    pub message: String,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl NetworkError {
    pub fn new(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(
            NetworkErrorKind::TimedOut,
            format!("no response within {after:?}"),
        )
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(err: reqwest::Error) -> Self {
        let kind = NetworkErrorKind::classify(&err);
        let kind = if kind == NetworkErrorKind::Other && (err.is_request() || err.is_body()) {
            NetworkErrorKind::Protocol
        } else {
            kind
        };
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self {
            kind,
            message,
            source: Some(Arc::new(err)),
        }
    }
}

impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        Self {
            kind: NetworkErrorKind::from_io(err.kind()),
            message: err.to_string(),
            source: Some(Arc::new(err)),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for NetworkError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Request to {url} timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        url: String,
        timeout: Duration,
        attempts: u32,
    },

    #[error("Request to {url} failed after {attempts} attempt(s): {source}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        source: NetworkError,
    },

    #[error("HTTP/2 failed for {host}: {reason}")]
    ProtocolFallback { host: String, reason: String },

    #[error("Too many redirects (max {max}) starting at {url}")]
    RedirectLimitExceeded { url: String, max: usize },

    #[error("Response from {url} exceeds {limit} bytes")]
    ResponseTooLarge { url: String, limit: u64 },

    #[error("Upstream {url} kept rate limiting after {attempts} address(es)")]
    UpstreamRateLimited { url: String, attempts: u32 },

    #[error(transparent)]
    NoAddressAvailable(#[from] RoutePlannerError),

    #[error("Failed to decode response body: {0}")]
    Body(String),

    #[error("Client error: {0}")]
    Client(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Wrapper(io::Error);

    impl fmt::Display for Wrapper {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "wrapped")
        }
    }

    impl StdError for Wrapper {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[test]
    fn test_classify_walks_source_chain() {
        let err = Wrapper(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            NetworkErrorKind::classify(&err),
            NetworkErrorKind::ConnectionReset
        );
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(NetworkErrorKind::ConnectionReset.is_retryable());
        assert!(NetworkErrorKind::BrokenPipe.is_retryable());
        assert!(NetworkErrorKind::HostUnreachable.is_retryable());
        assert!(NetworkErrorKind::TimedOut.is_retryable());
        assert!(!NetworkErrorKind::ConnectionRefused.is_retryable());
        assert!(!NetworkErrorKind::Protocol.is_retryable());
        assert!(!NetworkErrorKind::Other.is_retryable());
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let err = NetworkError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(err.kind, NetworkErrorKind::BrokenPipe);
        assert!(err.source().is_some());
    }
}
