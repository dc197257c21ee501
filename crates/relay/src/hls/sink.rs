//! Output sink for reconstructed streams.
//!
//! [`output_sink`] returns a producer half ([`OutputSink`]) used by the
//! reconstructor and a consumer half ([`SinkReader`]). Writes apply
//! backpressure through a bounded channel. Either side can tear the pair
//! down: the producer with [`OutputSink::destroy`], the consumer by dropping
//! the reader.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::hls::error::HlsError;

#[derive(Debug, Clone)]
pub enum SinkEvent {
    Data(Bytes),
    /// Every known segment has been written; the stream may still close later.
    FinishBuffering,
    Error(HlsError),
}

struct Shared {
    destroyed: CancellationToken,
    error: Mutex<Option<HlsError>>,
}

impl Shared {
    fn take_error(&self) -> Option<SinkEvent> {
        self.error.lock().take().map(SinkEvent::Error)
    }
}

/// Create a connected sink pair with room for `capacity` pending events.
pub fn output_sink(capacity: usize) -> (OutputSink, SinkReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        destroyed: CancellationToken::new(),
        error: Mutex::new(None),
    });

    let state = (rx, shared.clone());
    let events = futures::stream::unfold(state, |(mut rx, shared)| async move {
        let event = tokio::select! {
            biased;
            event = rx.recv() => match event {
                Some(event) => Some(event),
                None => shared.take_error(),
            },
            _ = shared.destroyed.cancelled() => shared.take_error(),
        };
        event.map(|event| (event, (rx, shared)))
    })
    .fuse()
    .boxed();

    (
        OutputSink {
            tx,
            shared: shared.clone(),
        },
        SinkReader { events, shared },
    )
}

/// Producer half. Cloning shares the same underlying stream.
#[derive(Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<SinkEvent>,
    shared: Arc<Shared>,
}

impl OutputSink {
    /// Write a chunk, waiting while the reader is behind.
    pub async fn write(&self, data: Bytes) -> Result<(), HlsError> {
        self.send(SinkEvent::Data(data)).await
    }

    pub async fn finish_buffering(&self) -> Result<(), HlsError> {
        self.send(SinkEvent::FinishBuffering).await
    }

    /// Tear the stream down, optionally handing the reader an error.
    pub fn destroy(&self, error: Option<HlsError>) {
        if self.shared.destroyed.is_cancelled() {
            return;
        }
        if let Some(error) = error {
            *self.shared.error.lock() = Some(error);
        }
        self.shared.destroyed.cancel();
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once the sink has been destroyed from either side.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.shared.destroyed.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    async fn send(&self, event: SinkEvent) -> Result<(), HlsError> {
        if self.is_destroyed() {
            return Err(HlsError::SinkClosed);
        }
        tokio::select! {
            biased;
            _ = self.shared.destroyed.cancelled() => Err(HlsError::SinkClosed),
            sent = self.tx.send(event) => sent.map_err(|_| {
                self.shared.destroyed.cancel();
                HlsError::SinkClosed
            }),
        }
    }
}

/// Consumer half, a stream of [`SinkEvent`]s. Dropping it destroys the sink.
pub struct SinkReader {
    events: BoxStream<'static, SinkEvent>,
    shared: Arc<Shared>,
}

impl SinkReader {
    /// Adapt into an [`AsyncRead`] over the data chunks.
    pub fn into_async_read(self) -> SinkAsyncRead {
        SinkAsyncRead {
            reader: self,
            current_chunk: None,
            position: 0,
        }
    }
}

impl Stream for SinkReader {
    type Item = SinkEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<SinkEvent>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for SinkReader {
    fn drop(&mut self) {
        self.shared.destroyed.cancel();
    }
}

/// Byte reader over a [`SinkReader`]; a sink error surfaces as an I/O error.
pub struct SinkAsyncRead {
    reader: SinkReader,
    current_chunk: Option<Bytes>,
    position: usize,
}

impl AsyncRead for SinkAsyncRead {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if let Some(chunk) = &self.current_chunk {
                if self.position < chunk.len() {
                    let bytes_to_copy = std::cmp::min(buf.remaining(), chunk.len() - self.position);
                    buf.put_slice(&chunk[self.position..self.position + bytes_to_copy]);
                    self.position += bytes_to_copy;
                    return Poll::Ready(Ok(()));
                }
                self.current_chunk = None;
                self.position = 0;
            }

            match Pin::new(&mut self.reader).poll_next(cx) {
                Poll::Ready(Some(SinkEvent::Data(chunk))) => {
                    if !chunk.is_empty() {
                        self.current_chunk = Some(chunk);
                        self.position = 0;
                    }
                }
                Poll::Ready(Some(SinkEvent::FinishBuffering)) => continue,
                Poll::Ready(Some(SinkEvent::Error(e))) => {
                    return Poll::Ready(Err(std::io::Error::other(e)));
                }
                Poll::Ready(None) => return Poll::Ready(Ok(())),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
