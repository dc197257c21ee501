// HLS Stream Coordinator: wires playlist engine, scheduler and output manager
// into a single reconstruction run.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::hls::config::HlsConfig;
use crate::hls::decryption::KeyFetcher;
use crate::hls::error::HlsError;
use crate::hls::fetcher::{SegmentDownloader, SegmentFetcher};
use crate::hls::output::{OutputManager, OutputStats};
use crate::hls::playlist::{PlaylistEngine, SegmentJob};
use crate::hls::processor::{SegmentProcessor, SegmentTransformer};
use crate::hls::scheduler::SegmentScheduler;
use crate::hls::sink::{OutputSink, SinkReader, output_sink};
use crate::transport::Transport;

/// Rebuilds a continuous byte stream from an HLS manifest.
pub struct StreamReconstructor {
    transport: Arc<Transport>,
    config: Arc<HlsConfig>,
    key_fetcher: Arc<KeyFetcher>,
}

impl StreamReconstructor {
    pub fn new(transport: Arc<Transport>, config: HlsConfig) -> Self {
        let config = Arc::new(config);
        let key_fetcher = Arc::new(KeyFetcher::new(Arc::clone(&transport), Arc::clone(&config)));
        Self {
            transport,
            config,
            key_fetcher,
        }
    }

    pub fn config(&self) -> &HlsConfig {
        &self.config
    }

    /// Spawn a reconstruction and return the reading end of its sink.
    pub fn open(self: &Arc<Self>, manifest_url: impl Into<String>, decrypt: bool) -> SinkReader {
        let (sink, reader) = output_sink(self.config.output_config.sink_capacity);
        let this = Arc::clone(self);
        let manifest_url = manifest_url.into();
        tokio::spawn(async move {
            // Failures were already delivered to the reader through the sink.
            let _ = this.reconstruct(&manifest_url, sink, decrypt).await;
        });
        reader
    }

    /// Write every segment of `manifest_url`, in playlist order, to `sink`.
    ///
    /// Completes after `FinishBuffering` has been emitted, or early and
    /// without error if the sink is destroyed. A failure to load the manifest
    /// destroys the sink with that error.
    pub async fn reconstruct(
        &self,
        manifest_url: &str,
        sink: OutputSink,
        decrypt: bool,
    ) -> Result<(), HlsError> {
        let playlist_engine = PlaylistEngine::new(Arc::clone(&self.transport), Arc::clone(&self.config));

        let initial = match playlist_engine.load(manifest_url).await {
            Ok(initial) => initial,
            Err(e) => {
                error!(url = %manifest_url, error = %e, "Failed to load manifest");
                sink.destroy(Some(e.clone()));
                return Err(e);
            }
        };
        info!(
            url = %initial.url,
            live = initial.playlist.live,
            segments = initial.playlist.segments.len(),
            "Starting reconstruction"
        );

        let segment_fetcher: Arc<dyn SegmentDownloader> = Arc::new(SegmentFetcher::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.config),
        ));
        let segment_processor: Arc<dyn SegmentTransformer> = Arc::new(SegmentProcessor::new(
            Arc::clone(&self.key_fetcher),
            decrypt,
        ));
        let scheduler = SegmentScheduler::new(
            Arc::clone(&self.config),
            segment_fetcher,
            segment_processor,
        );

        let concurrency = self.config.scheduler_config.download_concurrency.max(1);
        let (job_tx, job_rx) = mpsc::channel::<SegmentJob>(concurrency + 5);
        let (outcome_tx, outcome_rx) = mpsc::channel(concurrency * 2);
        let output = OutputManager::new(outcome_rx, sink.clone());

        let (playlist_result, (), output_result) = tokio::join!(
            playlist_engine.run(initial, job_tx, sink.clone()),
            scheduler.run(job_rx, outcome_tx, sink.clone()),
            output.run(),
        );

        if let Err(e) = playlist_result {
            if sink.is_destroyed() {
                return Ok(());
            }
            error!(error = %e, "Playlist refresh failed");
            sink.destroy(Some(e.clone()));
            return Err(e);
        }

        match output_result {
            Ok(OutputStats {
                written,
                skipped,
                bytes,
            }) => {
                if sink.is_destroyed() {
                    debug!("Sink destroyed, stopping reconstruction");
                    return Ok(());
                }
                info!(written, skipped, bytes, "All segments written");
            }
            Err(HlsError::SinkClosed) => {
                debug!("Sink destroyed, stopping reconstruction");
                return Ok(());
            }
            Err(e) => {
                sink.destroy(Some(e.clone()));
                return Err(e);
            }
        }

        match sink.finish_buffering().await {
            Ok(()) | Err(HlsError::SinkClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportConfig;
    use crate::hls::decryption::fixtures::*;
    use crate::hls::sink::SinkEvent;
    use crate::transport::mock::{MockExecutor, MockResponse};
    use futures::StreamExt;
    use reqwest::StatusCode;
    use std::time::Duration;

    fn reconstructor(executor: Arc<MockExecutor>) -> Arc<StreamReconstructor> {
        let transport = Transport::new(TransportConfig::default()).with_executor(executor);
        Arc::new(StreamReconstructor::new(
            Arc::new(transport),
            HlsConfig::default(),
        ))
    }

    async fn drain(reader: SinkReader) -> (Vec<u8>, Vec<SinkEvent>) {
        let events: Vec<_> = reader.collect().await;
        let mut data = Vec::new();
        for event in &events {
            if let SinkEvent::Data(chunk) = event {
                data.extend_from_slice(chunk);
            }
        }
        (data, events)
    }

    #[tokio::test(start_paused = true)]
    async fn test_vod_written_in_order_despite_completion_order() {
        let executor = Arc::new(MockExecutor::with_handler(|request| {
            let path = request.url.path().to_string();
            match path.as_str() {
                "/vod/index.m3u8" => Ok(MockResponse::ok(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\na.ts\n#EXTINF:2.0,\nb.ts\n#EXTINF:2.0,\nc.ts\n#EXT-X-ENDLIST\n",
                )),
                "/vod/a.ts" => Ok(MockResponse::ok("A")),
                "/vod/b.ts" => Ok(MockResponse::ok("B")),
                "/vod/c.ts" => Ok(MockResponse::ok("C")),
                _ => Ok(MockResponse::status(StatusCode::NOT_FOUND)),
            }
        }));
        let reader = reconstructor(executor).open("https://cdn.test/vod/index.m3u8", true);

        let (data, events) = drain(reader).await;
        assert_eq!(data, b"ABC");
        assert!(matches!(events.last(), Some(SinkEvent::FinishBuffering)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_encrypted_segments_decrypted_with_derived_iv() {
        let executor = Arc::new(MockExecutor::with_handler(|request| {
            match request.url.path() {
                "/enc/index.m3u8" => Ok(MockResponse::ok(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MEDIA-SEQUENCE:7\n\
                     #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
                     #EXTINF:2.0,\nseg7.ts\n#EXT-X-ENDLIST\n",
                )),
                "/enc/key.bin" => Ok(MockResponse::ok(key())),
                "/enc/seg7.ts" => Ok(MockResponse::ok(ciphertext(CIPHERTEXT_SEQ7))),
                _ => Ok(MockResponse::status(StatusCode::NOT_FOUND)),
            }
        }));
        let reader = reconstructor(executor).open("https://cdn.test/enc/index.m3u8", true);

        let (data, _) = drain(reader).await;
        assert_eq!(data, PLAINTEXT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecryptable_segment_skipped() {
        let executor = Arc::new(MockExecutor::with_handler(|request| {
            match request.url.path() {
                "/enc/index.m3u8" => Ok(MockResponse::ok(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nplain.ts\n\
                     #EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n\
                     #EXTINF:2.0,\nbroken.ts\n#EXT-X-ENDLIST\n",
                )),
                "/enc/key.bin" => Ok(MockResponse::ok(key())),
                "/enc/plain.ts" => Ok(MockResponse::ok("clear")),
                "/enc/broken.ts" => Ok(MockResponse::ok("not a block multiple")),
                _ => Ok(MockResponse::status(StatusCode::NOT_FOUND)),
            }
        }));
        let reader = reconstructor(executor).open("https://cdn.test/enc/index.m3u8", true);

        let (data, events) = drain(reader).await;
        assert_eq!(data, b"clear");
        assert!(matches!(events.last(), Some(SinkEvent::FinishBuffering)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_segment_written_first() {
        let executor = Arc::new(MockExecutor::with_handler(|request| {
            match request.url.path() {
                "/fmp4/index.m3u8" => Ok(MockResponse::ok(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXT-X-MAP:URI=\"init.mp4\"\n\
                     #EXTINF:2.0,\n1.m4s\n#EXTINF:2.0,\n2.m4s\n#EXT-X-ENDLIST\n",
                )),
                "/fmp4/init.mp4" => Ok(MockResponse::ok("I")),
                "/fmp4/1.m4s" => Ok(MockResponse::ok("1")),
                "/fmp4/2.m4s" => Ok(MockResponse::ok("2")),
                _ => Ok(MockResponse::status(StatusCode::NOT_FOUND)),
            }
        }));
        let reader = reconstructor(executor).open("https://cdn.test/fmp4/index.m3u8", true);

        let (data, _) = drain(reader).await;
        assert_eq!(data, b"I12");
    }

    #[tokio::test]
    async fn test_manifest_failure_destroys_sink_with_error() {
        let executor = Arc::new(MockExecutor::with_handler(|_| {
            Ok(MockResponse::status(StatusCode::NOT_FOUND))
        }));
        let reconstructor = reconstructor(executor);
        let (sink, reader) = output_sink(4);

        let err = reconstructor
            .reconstruct("https://cdn.test/missing.m3u8", sink.clone(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, HlsError::ManifestFetch { status: 404, .. }));
        assert!(sink.is_destroyed());

        drop(sink);
        let (_, events) = drain(reader).await;
        assert!(matches!(
            events.as_slice(),
            [SinkEvent::Error(HlsError::ManifestFetch { status: 404, .. })]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_stops_quietly_when_reader_dropped() {
        let executor = Arc::new(MockExecutor::with_handler(|request| {
            match request.url.path() {
                "/live/index.m3u8" => Ok(MockResponse::ok(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:2\n#EXTINF:2.0,\nseg0.ts\n",
                )),
                _ => Ok(MockResponse::ok("x")),
            }
        }));
        let reconstructor = reconstructor(executor.clone());
        let (sink, mut reader) = output_sink(4);

        let run = tokio::spawn({
            let reconstructor = Arc::clone(&reconstructor);
            async move {
                reconstructor
                    .reconstruct("https://cdn.test/live/index.m3u8", sink, true)
                    .await
            }
        });

        assert!(matches!(reader.next().await, Some(SinkEvent::Data(_))));
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(reader);

        run.await.unwrap().unwrap();
        let calls = executor.calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(executor.calls(), calls);
    }
}
