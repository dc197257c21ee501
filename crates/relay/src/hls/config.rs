use std::time::Duration;

// --- Top-Level Configuration ---
#[derive(Debug, Clone, Default)]
pub struct HlsConfig {
    pub playlist_config: HlsPlaylistConfig,
    pub scheduler_config: HlsSchedulerConfig,
    pub fetcher_config: HlsFetcherConfig,
    pub decryption_config: HlsDecryptionConfig,
    pub output_config: HlsOutputConfig,
}

// --- Playlist Configuration ---
#[derive(Debug, Clone)]
pub struct HlsPlaylistConfig {
    /// Timeout for every playlist fetch, the initial load and each live refresh
    pub playlist_fetch_timeout: Duration,
    /// Floor for the live refresh interval; the target duration is used when larger
    pub live_refresh_interval: Duration,
    pub live_max_refresh_retries: u32,
    /// Multiplied by the retry count between failed refreshes
    pub live_refresh_retry_delay: Duration,
    pub variant_selection_policy: HlsVariantSelectionPolicy,
}

impl Default for HlsPlaylistConfig {
    fn default() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(15),
            live_refresh_interval: Duration::from_secs(1),
            live_max_refresh_retries: 5,
            live_refresh_retry_delay: Duration::from_secs(1),
            variant_selection_policy: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HlsVariantSelectionPolicy {
    #[default]
    HighestBitrate, // Select the variant with the highest bandwidth
    LowestBitrate,
    ClosestToBitrate(u64), // Select variant closest to the specified bitrate
    AudioOnly,             // Variant carrying audio codecs only
}

// --- Scheduler Configuration ---
#[derive(Debug, Clone)]
pub struct HlsSchedulerConfig {
    pub download_concurrency: usize, // Max concurrent segment downloads
}

impl Default for HlsSchedulerConfig {
    fn default() -> Self {
        Self {
            download_concurrency: 3,
        }
    }
}

// --- Fetcher Configuration ---
#[derive(Debug, Clone)]
pub struct HlsFetcherConfig {
    pub segment_download_timeout: Duration,
    /// Transport-level retries per segment, `None` keeps the transport default
    pub max_segment_retries: Option<u32>,
    pub key_download_timeout: Duration,
}

impl Default for HlsFetcherConfig {
    fn default() -> Self {
        Self {
            segment_download_timeout: Duration::from_secs(10),
            max_segment_retries: None,
            key_download_timeout: Duration::from_secs(5),
        }
    }
}

// --- Decryption Configuration ---
#[derive(Debug, Clone)]
pub struct HlsDecryptionConfig {
    pub key_cache_ttl: Duration, // TTL for keys in the in-memory cache
    pub key_cache_capacity: u64,
}

impl Default for HlsDecryptionConfig {
    fn default() -> Self {
        Self {
            key_cache_ttl: Duration::from_secs(60 * 60),
            key_cache_capacity: 64,
        }
    }
}

// --- Output Configuration ---
#[derive(Debug, Clone)]
pub struct HlsOutputConfig {
    /// Chunks buffered between the reconstructor and the sink reader
    pub sink_capacity: usize,
}

impl Default for HlsOutputConfig {
    fn default() -> Self {
        Self { sink_capacity: 16 }
    }
}
