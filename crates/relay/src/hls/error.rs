use std::sync::Arc;

use crate::transport::TransportError;

#[derive(Debug, thiserror::Error, Clone)]
pub enum HlsError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Manifest fetch failed for {url}: HTTP {status}")]
    ManifestFetch { url: String, status: u16 },
    #[error("Manifest parse error: {0}")]
    ManifestParse(String),
    #[error("Segment fetch error: {0}")]
    SegmentFetch(String),
    #[error("Segment decryption error: {0}")]
    SegmentDecryption(String),
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: Arc<std::io::Error>,
    },
    #[error("Output sink closed")]
    SinkClosed,
    #[error("Internal error: {0}")]
    Internal(String),
}

// Manual implementation of From<std::io::Error> for HlsError
// because of the Arc wrapping.
impl From<std::io::Error> for HlsError {
    fn from(err: std::io::Error) -> Self {
        HlsError::Io {
            source: Arc::new(err),
        }
    }
}
