//! HLS stream reconstruction.
//!
//! A [`StreamReconstructor`] loads a manifest through the shared
//! [`Transport`](crate::transport::Transport), picks a variant, downloads
//! segments concurrently and writes them, decrypted and in playlist order,
//! to an [`OutputSink`]. Live playlists are polled until they end or the
//! sink is destroyed.

pub mod config;
pub mod coordinator;
pub mod decryption;
pub mod error;
pub mod fetcher;
pub mod output;
pub mod playlist;
pub mod processor;
pub mod scheduler;
pub mod sink;

pub use config::{
    HlsConfig, HlsDecryptionConfig, HlsFetcherConfig, HlsOutputConfig, HlsPlaylistConfig,
    HlsSchedulerConfig, HlsVariantSelectionPolicy,
};
pub use coordinator::StreamReconstructor;
pub use error::HlsError;
pub use playlist::{
    ByteRange, EncryptionKey, InitSegment, Segment, SegmentPlaylist, parse_media_playlist,
};
pub use sink::{OutputSink, SinkAsyncRead, SinkEvent, SinkReader, output_sink};
