// HLS Decryption: AES-128-CBC segment decryption with a cached key fetcher.

use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use moka::future::Cache;
use tracing::debug;
use url::Url;

use crate::hls::config::HlsConfig;
use crate::hls::error::HlsError;
use crate::transport::{RequestOptions, Transport};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// IV used when the key tag carries none: the media sequence number as a
/// big-endian 128-bit integer.
pub fn sequence_iv(sequence_number: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[8..].copy_from_slice(&sequence_number.to_be_bytes());
    iv
}

/// Decrypt one AES-128-CBC payload with PKCS#7 padding.
pub fn decrypt_aes128_cbc(data: &[u8], key: &[u8], iv: &[u8; 16]) -> Result<Bytes, HlsError> {
    if key.len() != 16 {
        return Err(HlsError::SegmentDecryption(format!(
            "AES-128 key must be 16 bytes, got {}",
            key.len()
        )));
    }
    let decryptor = Aes128CbcDec::new_from_slices(key, iv)
        .map_err(|e| HlsError::SegmentDecryption(format!("invalid key or IV: {e}")))?;

    let mut buffer = data.to_vec();
    let plain_len = decryptor
        .decrypt_padded_mut::<Pkcs7>(&mut buffer)
        .map_err(|e| HlsError::SegmentDecryption(format!("decryption failed: {e}")))?
        .len();
    buffer.truncate(plain_len);
    Ok(Bytes::from(buffer))
}

/// Fetches key bytes once per URI and keeps them for a TTL.
pub struct KeyFetcher {
    transport: Arc<Transport>,
    config: Arc<HlsConfig>,
    cache: Cache<Url, Bytes>,
}

impl KeyFetcher {
    pub fn new(transport: Arc<Transport>, config: Arc<HlsConfig>) -> Self {
        let decryption_config = &config.decryption_config;
        let cache = Cache::builder()
            .max_capacity(decryption_config.key_cache_capacity)
            .time_to_live(decryption_config.key_cache_ttl)
            .build();
        Self {
            transport,
            config,
            cache,
        }
    }

    /// Key bytes for `key_uri`. Concurrent callers share a single fetch.
    pub async fn key(&self, key_uri: &Url) -> Result<Bytes, HlsError> {
        self.cache
            .try_get_with(key_uri.clone(), self.fetch(key_uri))
            .await
            .map_err(|e| (*e).clone())
    }

    async fn fetch(&self, key_uri: &Url) -> Result<Bytes, HlsError> {
        debug!(uri = %key_uri, "Fetching decryption key");
        let options =
            RequestOptions::get().with_timeout(self.config.fetcher_config.key_download_timeout);
        let response = self.transport.request(key_uri.as_str(), options).await?;
        if !response.is_success() {
            return Err(HlsError::SegmentDecryption(format!(
                "key fetch from {key_uri} failed: HTTP {}",
                response.status
            )));
        }
        let key = response.into_bytes().await?;
        if key.len() != 16 {
            return Err(HlsError::SegmentDecryption(format!(
                "key from {key_uri} is {} bytes, expected 16",
                key.len()
            )));
        }
        Ok(key)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const KEY: &str = "000102030405060708090a0b0c0d0e0f";
    pub const IV: &str = "0f0e0d0c0b0a09080706050403020100";
    pub const PLAINTEXT: &[u8] = b"relay segment payload 0123456789";
    pub const CIPHERTEXT: &str = "d05e54c0b783768bd7221fe4a550241dca019daab59ac100ff62709127ec7b2d1bfb859be430b839f196f8cb66c8a259";
    /// `PLAINTEXT` encrypted under `KEY` with the IV derived from sequence 7.
    pub const CIPHERTEXT_SEQ7: &str = "94e7e26581bd3a01fa0721b36062a3e1d32f4070cb587a10399d7841831452f72e37936de3497423c7cce3b9f5c2a23d";

    pub fn key() -> Vec<u8> {
        hex::decode(KEY).unwrap()
    }

    pub fn ciphertext(hex_str: &str) -> Vec<u8> {
        hex::decode(hex_str).unwrap()
    }
}
