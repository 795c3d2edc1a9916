//! Bounded channels joining the async upload/response side to the blocking
//! codec stage.
//!
//! ```text
//! upload pump ──InputSink──▶ ChannelReader ─▶ decode → resize → encode ─▶ ChunkWriter ──▶ OutputStream ──▶ response body
//!   (async)                     (blocking)                                   (blocking)        (async)
//! ```
//!
//! Both channels are bounded, so a slow client stalls the encoder, which in
//! turn stops draining upload chunks.

use std::io::{self, Read, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::ConvertError;

/// One message from the upload pump to the codec stage.
#[derive(Debug)]
pub(crate) enum InputEvent {
    Chunk(Bytes),
    End,
    Abort(String),
}

// ─── Input side ───────────────────────────────────────────────────────────────

/// Async write half of the upload channel.
///
/// The codec stage only treats the input as complete after [`InputSink::finish`].
/// Dropping the sink without finishing is reported as a truncated upload.
#[derive(Debug)]
pub struct InputSink {
    tx: mpsc::Sender<InputEvent>,
    bytes_sent: u64,
}

impl InputSink {
    pub(crate) fn new(tx: mpsc::Sender<InputEvent>) -> Self {
        Self { tx, bytes_sent: 0 }
    }

    /// Forward a chunk, waiting while the codec stage is behind.
    ///
    /// Fails once the pipeline has shut down (client gone, stage failed, or
    /// timed out); the caller should stop reading the upload.
    pub async fn send(&mut self, chunk: Bytes) -> Result<(), ConvertError> {
        let len = chunk.len() as u64;
        self.tx
            .send(InputEvent::Chunk(chunk))
            .await
            .map_err(|_| ConvertError::stream("conversion pipeline closed"))?;
        self.bytes_sent += len;
        Ok(())
    }

    /// Mark the upload as complete.
    pub async fn finish(self) -> Result<(), ConvertError> {
        debug!(bytes = self.bytes_sent, "upload forwarded to pipeline");
        self.tx
            .send(InputEvent::End)
            .await
            .map_err(|_| ConvertError::stream("conversion pipeline closed"))
    }

    /// Fail the conversion with `reason` (e.g. a multipart framing error).
    pub async fn abort(self, reason: impl Into<String>) {
        let _ = self.tx.send(InputEvent::Abort(reason.into())).await;
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Blocking `Read` over the upload channel. Only usable off the async runtime.
pub(crate) struct ChannelReader {
    rx: mpsc::Receiver<InputEvent>,
    current: Bytes,
    done: bool,
}

impl ChannelReader {
    pub(crate) fn new(rx: mpsc::Receiver<InputEvent>) -> Self {
        Self { rx, current: Bytes::new(), done: false }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.rx.blocking_recv() {
                Some(InputEvent::Chunk(chunk)) => self.current = chunk,
                Some(InputEvent::End) => self.done = true,
                Some(InputEvent::Abort(reason)) => {
                    return Err(io::Error::other(reason));
                }
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "upload ended before the file was complete",
                    ));
                }
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current.split_to(n));
        Ok(n)
    }
}

// ─── Output side ──────────────────────────────────────────────────────────────

/// Blocking `Write` that ships fixed-size chunks to the response body.
pub(crate) struct ChunkWriter {
    tx: mpsc::Sender<Result<Bytes, ConvertError>>,
    buf: BytesMut,
    chunk_size: usize,
    bytes_written: u64,
}

impl ChunkWriter {
    pub(crate) fn new(tx: mpsc::Sender<Result<Bytes, ConvertError>>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
            bytes_written: 0,
        }
    }

    fn ship(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.bytes_written += chunk.len() as u64;
        self.tx.blocking_send(Ok(chunk)).map_err(|_| {
            io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")
        })
    }

    /// Flush what is left and close the body.
    pub(crate) fn finish(mut self) -> io::Result<u64> {
        self.ship()?;
        Ok(self.bytes_written)
    }

    /// Terminate the body with `err`. Ignored if the body is already gone.
    pub(crate) fn fail(self, err: ConvertError) {
        let _ = self.tx.blocking_send(Err(err));
    }
}

impl Write for ChunkWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.ship()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ship()
    }
}

/// The converted image as an async byte stream.
///
/// Yields `Err` and then ends if the codec stage fails or the deadline
/// passes. Dropping it (client disconnect) makes the encoder's next write
/// fail, which tears the stage down.
pub struct OutputStream {
    inner: ReceiverStream<Result<Bytes, ConvertError>>,
    deadline: Option<Pin<Box<Sleep>>>,
    expired: bool,
}

impl OutputStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Result<Bytes, ConvertError>>,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
            deadline: deadline.map(|d| Box::pin(tokio::time::sleep_until(d))),
            expired: false,
        }
    }
}

impl std::fmt::Debug for OutputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputStream")
            .field("has_deadline", &self.deadline.is_some())
            .field("expired", &self.expired)
            .finish()
    }
}

impl Stream for OutputStream {
    type Item = Result<Bytes, ConvertError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(None);
        }
        let timed_out = this
            .deadline
            .as_mut()
            .is_some_and(|deadline| deadline.as_mut().poll(cx).is_ready());
        if timed_out {
            this.expired = true;
            this.inner.close();
            return Poll::Ready(Some(Err(ConvertError::stream("conversion timed out"))));
        }
        Pin::new(&mut this.inner).poll_next(cx)
    }
}
