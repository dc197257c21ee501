// HLS Output Manager: reorders scheduler outcomes by ordinal and writes them
// to the sink strictly in playlist order.

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::hls::error::HlsError;
use crate::hls::scheduler::SegmentOutcome;
use crate::hls::sink::OutputSink;

/// Summary of one output run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputStats {
    pub written: u64,
    pub skipped: u64,
    pub bytes: u64,
}

pub struct OutputManager {
    input_rx: mpsc::Receiver<SegmentOutcome>,
    sink: OutputSink,
    /// `None` marks a failed segment that is skipped when its turn comes.
    reorder_buffer: BTreeMap<u64, Option<Bytes>>,
    expected_next_ordinal: u64,
    stats: OutputStats,
}

impl OutputManager {
    pub fn new(input_rx: mpsc::Receiver<SegmentOutcome>, sink: OutputSink) -> Self {
        Self {
            input_rx,
            sink,
            reorder_buffer: BTreeMap::new(),
            expected_next_ordinal: 0,
            stats: OutputStats::default(),
        }
    }

    /// Runs until the input closes. Returns `SinkClosed` if the sink went
    /// away first.
    pub async fn run(mut self) -> Result<OutputStats, HlsError> {
        while let Some(outcome) = self.input_rx.recv().await {
            if outcome.ordinal < self.expected_next_ordinal {
                warn!(ordinal = outcome.ordinal, "Duplicate segment outcome ignored");
                continue;
            }
            let data = match outcome.result {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!(segment = %outcome.description, error = %e, "Skipping failed segment");
                    None
                }
            };
            self.reorder_buffer.insert(outcome.ordinal, data);
            self.try_emit_segments().await?;
        }

        if !self.reorder_buffer.is_empty() {
            // Jobs abandoned upstream leave holes; whatever follows is still written in order.
            debug!(
                pending = self.reorder_buffer.len(),
                "Flushing reorder buffer past missing segments"
            );
            let remaining = std::mem::take(&mut self.reorder_buffer);
            for data in remaining.into_values() {
                self.emit(data).await?;
            }
        }
        debug!(stats = ?self.stats, "Output finished");
        Ok(self.stats)
    }

    async fn try_emit_segments(&mut self) -> Result<(), HlsError> {
        while let Some(entry) = self.reorder_buffer.first_entry() {
            if *entry.key() != self.expected_next_ordinal {
                break;
            }
            let data = entry.remove();
            self.expected_next_ordinal += 1;
            self.emit(data).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, data: Option<Bytes>) -> Result<(), HlsError> {
        match data {
            Some(data) => {
                self.stats.bytes += data.len() as u64;
                self.stats.written += 1;
                self.sink.write(data).await
            }
            None => {
                self.stats.skipped += 1;
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::sink::{SinkEvent, output_sink};
    use futures::StreamExt;

    fn ready(ordinal: u64, data: &'static str) -> SegmentOutcome {
        SegmentOutcome {
            ordinal,
            description: format!("seg{ordinal}"),
            result: Ok(Bytes::from_static(data.as_bytes())),
        }
    }

    fn failed(ordinal: u64) -> SegmentOutcome {
        SegmentOutcome {
            ordinal,
            description: format!("seg{ordinal}"),
            result: Err(HlsError::SegmentFetch("gone".into())),
        }
    }

    async fn collect(outcomes: Vec<SegmentOutcome>) -> (Vec<u8>, OutputStats) {
        let (sink, reader) = output_sink(16);
        let (tx, rx) = mpsc::channel(16);
        for outcome in outcomes {
            tx.send(outcome).await.unwrap();
        }
        drop(tx);
        let stats = OutputManager::new(rx, sink).run().await.unwrap();

        let mut out = Vec::new();
        let events: Vec<_> = reader.take(stats.written as usize).collect().await;
        for event in events {
            if let SinkEvent::Data(data) = event {
                out.extend_from_slice(&data);
            }
        }
        (out, stats)
    }

    #[tokio::test]
    async fn test_swapped_completion_written_in_order() {
        let (out, stats) = collect(vec![ready(1, "B"), ready(0, "A"), ready(2, "C")]).await;
        assert_eq!(out, b"ABC");
        assert_eq!(stats.written, 3);
    }

    #[tokio::test]
    async fn test_failed_segment_skipped() {
        let (out, stats) = collect(vec![ready(2, "C"), failed(1), ready(0, "A")]).await;
        assert_eq!(out, b"AC");
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.bytes, 2);
    }

    #[tokio::test]
    async fn test_holes_flushed_in_order_at_end() {
        let (out, _) = collect(vec![ready(3, "D"), ready(0, "A"), ready(2, "C")]).await;
        assert_eq!(out, b"ACD");
    }

    #[tokio::test]
    async fn test_sink_closed_stops_output() {
        let (sink, reader) = output_sink(1);
        drop(reader);
        let (tx, rx) = mpsc::channel(4);
        tx.send(ready(0, "A")).await.unwrap();
        drop(tx);
        let err = OutputManager::new(rx, sink).run().await.unwrap_err();
        assert!(matches!(err, HlsError::SinkClosed));
    }
}
