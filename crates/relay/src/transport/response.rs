use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Version};
use serde::de::DeserializeOwned;
use url::Url;

use super::executor::BodyStream;
use super::{NetworkError, TransportError};

pub enum ResponseBody {
    Buffered(Bytes),
    Stream(BodyStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffered(bytes) => f.debug_tuple("Buffered").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Final response after redirects and retries.
#[derive(Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub version: Version,
    /// URL that produced this response, after redirects.
    pub url: Url,
    pub body: ResponseBody,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Buffered body, or `None` for streaming responses.
    pub fn bytes(&self) -> Option<&Bytes> {
        match &self.body {
            ResponseBody::Buffered(bytes) => Some(bytes),
            ResponseBody::Stream(_) => None,
        }
    }

    pub fn text(&self) -> Result<String, TransportError> {
        let bytes = self.buffered()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(self.buffered()?)
            .map_err(|e| TransportError::Body(format!("invalid JSON from {}: {e}", self.url)))
    }

    /// Collect the body regardless of mode.
    pub async fn into_bytes(self) -> Result<Bytes, TransportError> {
        match self.body {
            ResponseBody::Buffered(bytes) => Ok(bytes),
            ResponseBody::Stream(stream) => {
                let url = self.url.to_string();
                let mut buffer = BytesMut::new();
                let mut stream = stream;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|source| TransportError::Network {
                        url: url.clone(),
                        attempts: 1,
                        source,
                    })?;
                    buffer.extend_from_slice(&chunk);
                }
                Ok(buffer.freeze())
            }
        }
    }

    /// The body as a stream, wrapping buffered bodies in a single chunk.
    pub fn into_stream(self) -> BodyStream {
        match self.body {
            ResponseBody::Stream(stream) => stream,
            ResponseBody::Buffered(bytes) => {
                futures::stream::once(async move { Ok::<_, NetworkError>(bytes) }).boxed()
            }
        }
    }

    /// The body as `std::io::Error` chunks, for `StreamReader`-style adapters.
    pub fn into_io_stream(
        self,
    ) -> impl futures::Stream<Item = Result<Bytes, std::io::Error>> + Send {
        self.into_stream()
            .map_err(|e| std::io::Error::other(e.to_string()))
    }

    fn buffered(&self) -> Result<&Bytes, TransportError> {
        self.bytes().ok_or_else(|| {
            TransportError::InvalidRequest("body was requested in streaming mode".into())
        })
    }
}
