// HLS Segment Fetcher: downloads individual segments through the transport.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{HeaderValue, RANGE};
use tracing::{debug, trace};

use crate::hls::config::HlsConfig;
use crate::hls::error::HlsError;
use crate::hls::playlist::{ByteRange, JobSource, SegmentJob};
use crate::transport::{RequestOptions, Transport};

#[async_trait]
pub trait SegmentDownloader: Send + Sync {
    /// Raw (possibly encrypted) bytes for a job.
    async fn download(&self, job: &SegmentJob) -> Result<Bytes, HlsError>;
}

pub struct SegmentFetcher {
    transport: Arc<Transport>,
    config: Arc<HlsConfig>,
}

impl SegmentFetcher {
    pub fn new(transport: Arc<Transport>, config: Arc<HlsConfig>) -> Self {
        Self { transport, config }
    }

    async fn fetch_remote(
        &self,
        url: &url::Url,
        byte_range: Option<ByteRange>,
    ) -> Result<Bytes, HlsError> {
        let fetcher_config = &self.config.fetcher_config;
        let mut options = RequestOptions::get().with_timeout(fetcher_config.segment_download_timeout);
        if let Some(retries) = fetcher_config.max_segment_retries {
            options = options.with_max_retries(retries);
        }
        if let Some(range) = byte_range {
            let value = HeaderValue::from_str(&range.header_value())
                .map_err(|e| HlsError::Internal(format!("invalid range header: {e}")))?;
            options = options.with_header(RANGE, value);
        }

        let response = self.transport.request(url.as_str(), options).await?;
        let status = response.status;
        if !status.is_success() {
            return Err(HlsError::SegmentFetch(format!("{url}: HTTP {status}")));
        }

        let data = response.into_bytes().await?;
        trace!(url = %url, len = data.len(), "Segment downloaded");

        match byte_range {
            // Server ignored the range and sent the whole resource.
            Some(range) if status == StatusCode::OK => {
                debug!(url = %url, "Range not honoured, slicing locally");
                slice_range(data, range)
                    .ok_or_else(|| HlsError::SegmentFetch(format!("{url}: body shorter than range")))
            }
            _ => Ok(data),
        }
    }
}

fn slice_range(data: Bytes, range: ByteRange) -> Option<Bytes> {
    let start = usize::try_from(range.offset).ok()?;
    let end = usize::try_from(range.end()).ok()?;
    (end <= data.len()).then(|| data.slice(start..end))
}

#[async_trait]
impl SegmentDownloader for SegmentFetcher {
    async fn download(&self, job: &SegmentJob) -> Result<Bytes, HlsError> {
        match &job.source {
            JobSource::Inline(data) => Ok(data.clone()),
            JobSource::Remote { url, byte_range } => self.fetch_remote(url, *byte_range).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportConfig;
    use crate::transport::mock::{MockExecutor, MockResponse};
    use url::Url;

    fn fetcher(executor: Arc<MockExecutor>) -> SegmentFetcher {
        let transport = Transport::new(TransportConfig::default()).with_executor(executor);
        SegmentFetcher::new(Arc::new(transport), Arc::new(HlsConfig::default()))
    }

    fn job(byte_range: Option<ByteRange>) -> SegmentJob {
        SegmentJob {
            ordinal: 0,
            source: JobSource::Remote {
                url: Url::parse("http://cdn.test/all.ts").unwrap(),
                byte_range,
            },
            sequence_number: 0,
            key: None,
            is_init_segment: false,
        }
    }

    #[tokio::test]
    async fn test_range_header_sent() {
        let executor = Arc::new(MockExecutor::scripted([Ok(MockResponse::status(
            StatusCode::PARTIAL_CONTENT,
        )
        .body("0123"))]));
        let data = fetcher(executor.clone())
            .download(&job(Some(ByteRange { offset: 10, length: 4 })))
            .await
            .unwrap();

        assert_eq!(data.as_ref(), b"0123");
        assert_eq!(executor.request(0).headers[RANGE], "bytes=10-13");
    }

    #[tokio::test]
    async fn test_full_body_sliced_when_range_ignored() {
        let executor = Arc::new(MockExecutor::scripted([Ok(MockResponse::ok("abcdefgh"))]));
        let data = fetcher(executor)
            .download(&job(Some(ByteRange { offset: 2, length: 3 })))
            .await
            .unwrap();
        assert_eq!(data.as_ref(), b"cde");
    }

    #[tokio::test]
    async fn test_http_error_is_segment_fetch_error() {
        let executor = Arc::new(MockExecutor::scripted([Ok(MockResponse::status(
            StatusCode::NOT_FOUND,
        ))]));
        let err = fetcher(executor).download(&job(None)).await.unwrap_err();
        assert!(matches!(err, HlsError::SegmentFetch(_)));
    }

    #[tokio::test]
    async fn test_inline_source_skips_network() {
        let executor = Arc::new(MockExecutor::default());
        let mut inline = job(None);
        inline.source = JobSource::Inline(Bytes::from_static(b"init"));
        let data = fetcher(executor.clone()).download(&inline).await.unwrap();
        assert_eq!(data.as_ref(), b"init");
        assert_eq!(executor.calls(), 0);
    }
}
