// HLS Segment Scheduler: runs fetch + transform for queued jobs with bounded
// concurrency and hands every outcome, in completion order, to the output
// stage.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::hls::config::HlsConfig;
use crate::hls::error::HlsError;
use crate::hls::fetcher::SegmentDownloader;
use crate::hls::playlist::SegmentJob;
use crate::hls::processor::SegmentTransformer;
use crate::hls::sink::OutputSink;

#[derive(Debug)]
pub struct SegmentOutcome {
    pub ordinal: u64,
    pub description: String,
    pub result: Result<Bytes, HlsError>,
}

pub struct SegmentScheduler {
    config: Arc<HlsConfig>,
    segment_fetcher: Arc<dyn SegmentDownloader>,
    segment_processor: Arc<dyn SegmentTransformer>,
}

impl SegmentScheduler {
    pub fn new(
        config: Arc<HlsConfig>,
        segment_fetcher: Arc<dyn SegmentDownloader>,
        segment_processor: Arc<dyn SegmentTransformer>,
    ) -> Self {
        Self {
            config,
            segment_fetcher,
            segment_processor,
        }
    }

    async fn perform_segment_processing(
        segment_fetcher: Arc<dyn SegmentDownloader>,
        segment_processor: Arc<dyn SegmentTransformer>,
        job: SegmentJob,
    ) -> SegmentOutcome {
        let description = job.describe();
        let result = match segment_fetcher.download(&job).await {
            Ok(raw) => segment_processor.transform(raw, &job).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(segment = %description, error = %e, "Segment failed");
        } else {
            debug!(segment = %description, ordinal = job.ordinal, "Segment ready");
        }
        SegmentOutcome {
            ordinal: job.ordinal,
            description,
            result,
        }
    }

    /// Drain `job_rx` until it closes and all in-flight jobs finish, or until
    /// the sink is destroyed.
    pub async fn run(
        &self,
        mut job_rx: mpsc::Receiver<SegmentJob>,
        outcome_tx: mpsc::Sender<SegmentOutcome>,
        sink: OutputSink,
    ) {
        info!("SegmentScheduler started");
        let concurrency = self.config.scheduler_config.download_concurrency.max(1);
        let mut futures = FuturesUnordered::new();
        let mut input_open = true;

        loop {
            let in_progress_count = futures.len();
            if !input_open && in_progress_count == 0 {
                break;
            }

            tokio::select! {
                biased;

                _ = sink.closed() => {
                    debug!(in_flight = in_progress_count, "Sink closed, abandoning segments");
                    break;
                }

                maybe_job = job_rx.recv(), if input_open && in_progress_count < concurrency => {
                    match maybe_job {
                        Some(job) => {
                            futures.push(Self::perform_segment_processing(
                                Arc::clone(&self.segment_fetcher),
                                Arc::clone(&self.segment_processor),
                                job,
                            ));
                        }
                        None => {
                            debug!("Job channel closed, draining in-flight segments");
                            input_open = false;
                        }
                    }
                }

                Some(outcome) = futures.next(), if in_progress_count > 0 => {
                    if outcome_tx.send(outcome).await.is_err() {
                        debug!("Output stage gone, stopping scheduler");
                        break;
                    }
                }
            }
        }
        info!("SegmentScheduler finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::playlist::JobSource;
    use crate::hls::sink::output_sink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Inline jobs whose payload is the delay in milliseconds.
    struct DelayedDownloader {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl SegmentDownloader for DelayedDownloader {
        async fn download(&self, job: &SegmentJob) -> Result<Bytes, HlsError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let JobSource::Inline(data) = &job.source else {
                unreachable!()
            };
            let delay: u64 = std::str::from_utf8(data).unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(data.clone())
        }
    }

    struct Identity;

    #[async_trait]
    impl SegmentTransformer for Identity {
        async fn transform(&self, data: Bytes, _job: &SegmentJob) -> Result<Bytes, HlsError> {
            Ok(data)
        }
    }

    fn job(ordinal: u64, delay_ms: u64) -> SegmentJob {
        SegmentJob {
            ordinal,
            source: JobSource::Inline(Bytes::from(delay_ms.to_string())),
            sequence_number: ordinal,
            key: None,
            is_init_segment: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_bounded_and_completion_order() {
        let downloader = Arc::new(DelayedDownloader {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let scheduler = SegmentScheduler::new(
            Arc::new(HlsConfig::default()),
            downloader.clone(),
            Arc::new(Identity),
        );
        let (sink, _reader) = output_sink(4);
        let (job_tx, job_rx) = mpsc::channel(8);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(8);

        for (ordinal, delay) in [(0, 300), (1, 100), (2, 200), (3, 50), (4, 10)] {
            job_tx.send(job(ordinal, delay)).await.unwrap();
        }
        drop(job_tx);
        scheduler.run(job_rx, outcome_tx, sink).await;

        let mut order = Vec::new();
        while let Some(outcome) = outcome_rx.recv().await {
            assert!(outcome.result.is_ok());
            order.push(outcome.ordinal);
        }
        assert_eq!(order.len(), 5);
        assert_ne!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(downloader.peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_sink_destroyed() {
        let downloader = Arc::new(DelayedDownloader {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let scheduler = SegmentScheduler::new(
            Arc::new(HlsConfig::default()),
            downloader,
            Arc::new(Identity),
        );
        let (sink, reader) = output_sink(4);
        let (job_tx, job_rx) = mpsc::channel(8);
        let (outcome_tx, _outcome_rx) = mpsc::channel(8);
        job_tx.send(job(0, 60_000)).await.unwrap();

        let run = tokio::spawn(async move { scheduler.run(job_rx, outcome_tx, sink).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(reader);
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
    }
}
