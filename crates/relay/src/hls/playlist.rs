// HLS Playlist Engine: fetches, parses and refreshes HLS playlists and turns
// new media segments into ordered download jobs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, MediaPlaylistType, Playlist};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::hls::config::{HlsConfig, HlsVariantSelectionPolicy};
use crate::hls::error::HlsError;
use crate::hls::sink::OutputSink;
use crate::transport::{RequestOptions, Transport};

/// Inclusive-start byte window within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Value for the HTTP `Range` header.
    pub fn header_value(&self) -> String {
        let last = self.offset + self.length.saturating_sub(1);
        format!("bytes={}-{}", self.offset, last)
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// AES-128 key reference; the key bytes are fetched lazily and cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub key_uri: Url,
    pub iv: Option<[u8; 16]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitSegment {
    /// Inline `data:` URI payload
    Data(Bytes),
    Remote {
        url: Url,
        byte_range: Option<ByteRange>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub url: Url,
    pub sequence_number: u64,
    pub byte_range: Option<ByteRange>,
    pub key: Option<EncryptionKey>,
    /// Initialization section in effect for this segment
    pub init_segment: Option<InitSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPlaylist {
    pub segments: Vec<Segment>,
    pub live: bool,
    pub target_duration_sec: u64,
}

impl SegmentPlaylist {
    pub fn init_segment(&self) -> Option<&InitSegment> {
        self.segments.first().and_then(|s| s.init_segment.as_ref())
    }
}

/// Where a job's bytes come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    Inline(Bytes),
    Remote {
        url: Url,
        byte_range: Option<ByteRange>,
    },
}

/// One unit of work for the scheduler. `ordinal` fixes its output position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentJob {
    pub ordinal: u64,
    pub source: JobSource,
    pub sequence_number: u64,
    pub key: Option<EncryptionKey>,
    pub is_init_segment: bool,
}

impl SegmentJob {
    pub fn describe(&self) -> String {
        match &self.source {
            JobSource::Inline(_) => format!("inline init segment #{}", self.ordinal),
            JobSource::Remote { url, .. } => url.to_string(),
        }
    }
}

/// Turn a parsed media playlist into absolute segments.
///
/// Keys and initialization sections stay in effect until the next tag
/// replaces them. A byte range without an offset continues where the
/// previous range of the same resource ended.
pub fn parse_media_playlist(
    base_url: &Url,
    playlist: &MediaPlaylist,
) -> Result<SegmentPlaylist, HlsError> {
    let mut segments = Vec::with_capacity(playlist.segments.len());
    let mut current_key: Option<EncryptionKey> = None;
    let mut current_init: Option<InitSegment> = None;
    let mut range_ends: HashMap<Url, u64> = HashMap::new();

    for (index, media_segment) in playlist.segments.iter().enumerate() {
        let sequence_number = playlist.media_sequence + index as u64;

        if let Some(key) = &media_segment.key {
            current_key = match &key.method {
                KeyMethod::None => None,
                KeyMethod::AES128 => {
                    let uri = key.uri.as_deref().ok_or_else(|| {
                        HlsError::ManifestParse("EXT-X-KEY without URI".to_string())
                    })?;
                    let iv = key.iv.as_deref().map(parse_iv).transpose()?;
                    Some(EncryptionKey {
                        key_uri: resolve(base_url, uri)?,
                        iv,
                    })
                }
                other => {
                    return Err(HlsError::ManifestParse(format!(
                        "unsupported encryption method: {other:?}"
                    )));
                }
            };
        }

        if let Some(map) = &media_segment.map {
            current_init = Some(if map.uri.starts_with("data:") {
                InitSegment::Data(decode_data_uri(&map.uri)?)
            } else {
                let url = resolve(base_url, &map.uri)?;
                let byte_range = map
                    .byte_range
                    .as_ref()
                    .map(|r| next_range(&mut range_ends, &url, r));
                InitSegment::Remote { url, byte_range }
            });
        }

        let url = resolve(base_url, &media_segment.uri)?;
        let byte_range = media_segment
            .byte_range
            .as_ref()
            .map(|r| next_range(&mut range_ends, &url, r));

        segments.push(Segment {
            url,
            sequence_number,
            byte_range,
            key: current_key.clone(),
            init_segment: current_init.clone(),
        });
    }

    let vod = matches!(playlist.playlist_type, Some(MediaPlaylistType::Vod));
    Ok(SegmentPlaylist {
        segments,
        live: !playlist.end_list && !vod,
        target_duration_sec: playlist.target_duration,
    })
}

fn next_range(ends: &mut HashMap<Url, u64>, url: &Url, range: &m3u8_rs::ByteRange) -> ByteRange {
    let offset = range
        .offset
        .unwrap_or_else(|| ends.get(url).copied().unwrap_or(0));
    let resolved = ByteRange {
        offset,
        length: range.length,
    };
    ends.insert(url.clone(), resolved.end());
    resolved
}

fn resolve(base_url: &Url, uri: &str) -> Result<Url, HlsError> {
    base_url
        .join(uri)
        .map_err(|e| HlsError::ManifestParse(format!("invalid URI '{uri}': {e}")))
}

/// Parse a hex IV such as `0x000102...`.
pub fn parse_iv(iv: &str) -> Result<[u8; 16], HlsError> {
    let digits = iv
        .strip_prefix("0x")
        .or_else(|| iv.strip_prefix("0X"))
        .unwrap_or(iv);
    let mut bytes = [0u8; 16];
    hex::decode_to_slice(digits, &mut bytes)
        .map_err(|e| HlsError::ManifestParse(format!("invalid IV '{iv}': {e}")))?;
    Ok(bytes)
}

/// Decode a `data:` URI into its payload.
pub fn decode_data_uri(uri: &str) -> Result<Bytes, HlsError> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| HlsError::ManifestParse("not a data URI".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| HlsError::ManifestParse("data URI without payload".to_string()))?;
    if meta.ends_with(";base64") {
        STANDARD
            .decode(payload)
            .map(Bytes::from)
            .map_err(|e| HlsError::ManifestParse(format!("invalid base64 data URI: {e}")))
    } else {
        Ok(Bytes::copy_from_slice(payload.as_bytes()))
    }
}

/// Pick a variant from a master playlist.
pub fn select_variant<'a>(
    master: &'a MasterPlaylist,
    policy: &HlsVariantSelectionPolicy,
) -> Option<&'a m3u8_rs::VariantStream> {
    let mut candidates = master.variants.iter().filter(|v| !v.is_i_frame);
    match policy {
        HlsVariantSelectionPolicy::HighestBitrate => candidates.max_by_key(|v| v.bandwidth),
        HlsVariantSelectionPolicy::LowestBitrate => candidates.min_by_key(|v| v.bandwidth),
        HlsVariantSelectionPolicy::ClosestToBitrate(target) => {
            candidates.min_by_key(|v| v.bandwidth.abs_diff(*target))
        }
        HlsVariantSelectionPolicy::AudioOnly => {
            candidates.find(|v| v.resolution.is_none() && is_audio_only(v.codecs.as_deref()))
        }
    }
    .or_else(|| master.variants.first())
}

fn is_audio_only(codecs: Option<&str>) -> bool {
    codecs.is_some_and(|codecs| {
        codecs.split(',').map(str::trim).all(|c| {
            c.starts_with("mp4a") || c.starts_with("ac-3") || c.starts_with("ec-3") || c == "opus"
        })
    })
}

/// A media playlist together with the URL it was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedPlaylist {
    pub url: Url,
    pub playlist: SegmentPlaylist,
}

pub struct PlaylistEngine {
    transport: Arc<Transport>,
    config: Arc<HlsConfig>,
}

impl PlaylistEngine {
    pub fn new(transport: Arc<Transport>, config: Arc<HlsConfig>) -> Self {
        Self { transport, config }
    }

    /// Fetch the manifest, following a master playlist to one variant.
    pub async fn load(&self, manifest_url: &str) -> Result<LoadedPlaylist, HlsError> {
        let url = Url::parse(manifest_url)
            .map_err(|e| HlsError::ManifestParse(format!("invalid manifest URL: {e}")))?;
        info!(url = %url, "Loading initial playlist");

        match self.fetch_playlist(&url).await? {
            (final_url, Playlist::MediaPlaylist(media)) => Ok(LoadedPlaylist {
                playlist: parse_media_playlist(&final_url, &media)?,
                url: final_url,
            }),
            (final_url, Playlist::MasterPlaylist(master)) => {
                let policy = &self.config.playlist_config.variant_selection_policy;
                let variant = select_variant(&master, policy).ok_or_else(|| {
                    HlsError::ManifestParse("master playlist has no variants".to_string())
                })?;
                let variant_url = resolve(&final_url, &variant.uri)?;
                debug!(
                    bandwidth = variant.bandwidth,
                    url = %variant_url,
                    "Selected variant"
                );

                match self.fetch_playlist(&variant_url).await? {
                    (media_url, Playlist::MediaPlaylist(media)) => Ok(LoadedPlaylist {
                        playlist: parse_media_playlist(&media_url, &media)?,
                        url: media_url,
                    }),
                    (_, Playlist::MasterPlaylist(_)) => Err(HlsError::ManifestParse(
                        "variant resolved to another master playlist".to_string(),
                    )),
                }
            }
        }
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<(Url, Playlist), HlsError> {
        let options = RequestOptions::get()
            .with_timeout(self.config.playlist_config.playlist_fetch_timeout);
        let response = self.transport.request(url.as_str(), options).await?;
        if !response.is_success() {
            return Err(HlsError::ManifestFetch {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }
        let final_url = response.url.clone();
        let body = response.into_bytes().await?;
        let playlist = m3u8_rs::parse_playlist_res(&body)
            .map_err(|e| HlsError::ManifestParse(format!("{url}: {e}")))?;
        Ok((final_url, playlist))
    }

    /// Emit jobs for the loaded playlist and, for live streams, keep polling
    /// for new segments until the playlist ends or the sink goes away.
    pub async fn run(
        &self,
        initial: LoadedPlaylist,
        job_tx: mpsc::Sender<SegmentJob>,
        sink: OutputSink,
    ) -> Result<(), HlsError> {
        let mut emitter = JobEmitter::default();
        let LoadedPlaylist { url, playlist } = initial;

        if !emitter.emit(&playlist, &job_tx, &sink).await {
            return Ok(());
        }
        if !playlist.live {
            info!(segments = playlist.segments.len(), "VOD playlist queued");
            return Ok(());
        }

        let playlist_config = &self.config.playlist_config;
        let mut target_duration = playlist.target_duration_sec;
        let mut retries = 0u32;

        loop {
            let interval =
                Duration::from_secs(target_duration).max(playlist_config.live_refresh_interval);
            if !wait_or_closed(interval, &sink, &job_tx).await {
                debug!("Stopping playlist refresh");
                return Ok(());
            }

            let refreshed = match self.fetch_playlist(&url).await {
                Ok((final_url, Playlist::MediaPlaylist(media))) => {
                    parse_media_playlist(&final_url, &media)
                }
                Ok((_, Playlist::MasterPlaylist(_))) => Err(HlsError::ManifestParse(
                    "media playlist turned into a master playlist".to_string(),
                )),
                Err(e) => Err(e),
            };

            match refreshed {
                Ok(playlist) => {
                    retries = 0;
                    target_duration = playlist.target_duration_sec;
                    if !emitter.emit(&playlist, &job_tx, &sink).await {
                        return Ok(());
                    }
                    if !playlist.live {
                        info!("Live playlist ended");
                        return Ok(());
                    }
                }
                Err(e) => {
                    retries += 1;
                    if retries > playlist_config.live_max_refresh_retries {
                        error!(error = %e, retries, "Giving up on playlist refresh");
                        return Err(e);
                    }
                    warn!(error = %e, retries, "Playlist refresh failed, retrying");
                    let delay = playlist_config.live_refresh_retry_delay * retries;
                    if !wait_or_closed(delay, &sink, &job_tx).await {
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Sleep unless the sink or the scheduler goes away first.
async fn wait_or_closed(
    duration: Duration,
    sink: &OutputSink,
    job_tx: &mpsc::Sender<SegmentJob>,
) -> bool {
    tokio::select! {
        biased;
        _ = sink.closed() => false,
        _ = job_tx.closed() => false,
        _ = tokio::time::sleep(duration) => !sink.is_destroyed(),
    }
}

/// Assigns ordinals and drops segments that were already queued.
#[derive(Default)]
struct JobEmitter {
    seen: HashSet<(Url, Option<ByteRange>)>,
    current_init: Option<InitSegment>,
    next_ordinal: u64,
}

impl JobEmitter {
    /// Returns false once nobody is listening anymore.
    async fn emit(
        &mut self,
        playlist: &SegmentPlaylist,
        job_tx: &mpsc::Sender<SegmentJob>,
        sink: &OutputSink,
    ) -> bool {
        for segment in &playlist.segments {
            if sink.is_destroyed() {
                return false;
            }
            if !self.seen.insert((segment.url.clone(), segment.byte_range)) {
                continue;
            }

            if segment.init_segment.is_some() && segment.init_segment != self.current_init {
                self.current_init = segment.init_segment.clone();
                if let Some(init) = &self.current_init {
                    let source = match init {
                        InitSegment::Data(data) => JobSource::Inline(data.clone()),
                        InitSegment::Remote { url, byte_range } => JobSource::Remote {
                            url: url.clone(),
                            byte_range: *byte_range,
                        },
                    };
                    let job = self.job(source, segment, true);
                    if job_tx.send(job).await.is_err() {
                        return false;
                    }
                }
            }

            let source = JobSource::Remote {
                url: segment.url.clone(),
                byte_range: segment.byte_range,
            };
            let job = self.job(source, segment, false);
            if job_tx.send(job).await.is_err() {
                return false;
            }
        }
        true
    }

    fn job(&mut self, source: JobSource, segment: &Segment, is_init_segment: bool) -> SegmentJob {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        SegmentJob {
            ordinal,
            source,
            sequence_number: segment.sequence_number,
            key: segment.key.clone(),
            is_init_segment,
        }
    }
}
