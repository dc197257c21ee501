// HLS Segment Processor: turns downloaded bytes into output-ready bytes.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;

use crate::hls::decryption::{KeyFetcher, decrypt_aes128_cbc, sequence_iv};
use crate::hls::error::HlsError;
use crate::hls::playlist::SegmentJob;

#[async_trait]
pub trait SegmentTransformer: Send + Sync {
    async fn transform(&self, data: Bytes, job: &SegmentJob) -> Result<Bytes, HlsError>;
}

pub struct SegmentProcessor {
    key_fetcher: Arc<KeyFetcher>,
    decrypt: bool,
}

impl SegmentProcessor {
    pub fn new(key_fetcher: Arc<KeyFetcher>, decrypt: bool) -> Self {
        Self {
            key_fetcher,
            decrypt,
        }
    }
}

#[async_trait]
impl SegmentTransformer for SegmentProcessor {
    async fn transform(&self, data: Bytes, job: &SegmentJob) -> Result<Bytes, HlsError> {
        let Some(key) = job.key.as_ref().filter(|_| self.decrypt) else {
            return Ok(data);
        };

        let key_bytes = self.key_fetcher.key(&key.key_uri).await?;
        let iv = key.iv.unwrap_or_else(|| sequence_iv(job.sequence_number));
        let plain = decrypt_aes128_cbc(&data, &key_bytes, &iv)?;
        trace!(
            job = %job.describe(),
            encrypted = data.len(),
            decrypted = plain.len(),
            "Segment decrypted"
        );
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportConfig;
    use crate::hls::config::HlsConfig;
    use crate::hls::decryption::fixtures::*;
    use crate::hls::playlist::{EncryptionKey, JobSource};
    use crate::transport::Transport;
    use crate::transport::mock::{MockExecutor, MockResponse};
    use url::Url;

    fn processor(decrypt: bool) -> (SegmentProcessor, Arc<MockExecutor>) {
        let executor = Arc::new(MockExecutor::with_handler(|_| Ok(MockResponse::ok(key()))));
        let transport = Transport::new(TransportConfig::default()).with_executor(executor.clone());
        let fetcher = KeyFetcher::new(Arc::new(transport), Arc::new(HlsConfig::default()));
        (SegmentProcessor::new(Arc::new(fetcher), decrypt), executor)
    }

    fn encrypted_job(sequence_number: u64, iv: Option<[u8; 16]>) -> SegmentJob {
        SegmentJob {
            ordinal: 0,
            source: JobSource::Inline(Bytes::new()),
            sequence_number,
            key: Some(EncryptionKey {
                key_uri: Url::parse("http://cdn.test/key.bin").unwrap(),
                iv,
            }),
            is_init_segment: false,
        }
    }

    #[tokio::test]
    async fn test_explicit_iv() {
        let (processor, _) = processor(true);
        let mut iv = [0u8; 16];
        hex::decode_to_slice(IV, &mut iv).unwrap();

        let plain = processor
            .transform(ciphertext(CIPHERTEXT).into(), &encrypted_job(3, Some(iv)))
            .await
            .unwrap();
        assert_eq!(plain.as_ref(), PLAINTEXT);
    }

    #[tokio::test]
    async fn test_iv_derived_from_sequence() {
        let (processor, _) = processor(true);
        let plain = processor
            .transform(ciphertext(CIPHERTEXT_SEQ7).into(), &encrypted_job(7, None))
            .await
            .unwrap();
        assert_eq!(plain.as_ref(), PLAINTEXT);
    }

    #[tokio::test]
    async fn test_passthrough_when_decrypt_disabled() {
        let (processor, executor) = processor(false);
        let raw = Bytes::from(ciphertext(CIPHERTEXT));
        let out = processor
            .transform(raw.clone(), &encrypted_job(7, None))
            .await
            .unwrap();
        assert_eq!(out, raw);
        assert_eq!(executor.calls(), 0);
    }
}
