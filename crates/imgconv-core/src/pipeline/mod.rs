//! Streaming conversion pipeline.
//!
//! [`start`] wires a fresh pipeline for one request and returns the two ends
//! the caller drives: an [`InputSink`] for upload chunks and a
//! [`ConversionResult`] whose body streams the encoded image. Nothing is
//! shared between pipelines.

mod channel;
mod stage;

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{Instrument, error};

pub use channel::{InputSink, OutputStream};
pub use stage::cover_dimensions;

use crate::error::ConvertError;
use crate::naming::suggested_filename;
use crate::request::ConversionRequest;
use channel::{ChannelReader, ChunkWriter};

/// Tuning knobs shared by every pipeline the process starts.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Size of the chunks the response body is cut into.
    pub chunk_size: usize,
    /// Depth of the bounded channels on each side of the codec stage.
    pub channel_capacity: usize,
    /// Largest edge, in pixels, that may be decoded or produced by a resize.
    pub max_dimension: u32,
    /// Deadline for the response body, measured from [`start`].
    pub timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            channel_capacity: 8,
            max_dimension: 16_384,
            timeout: None,
        }
    }
}

/// The encoded image plus the metadata needed to serve it.
#[derive(Debug)]
pub struct ConversionResult {
    pub content_type: &'static str,
    pub filename: String,
    pub body: OutputStream,
}

/// Start a pipeline for `request`.
///
/// Must be called from within a tokio runtime; the codec stage runs on the
/// blocking pool and exits when the input ends, the output is dropped, or a
/// stage fails.
pub fn start(
    request: ConversionRequest,
    original_filename: Option<&str>,
    options: &PipelineOptions,
) -> (InputSink, ConversionResult) {
    let capacity = options.channel_capacity.max(1);
    let (input_tx, input_rx) = mpsc::channel(capacity);
    let (output_tx, output_rx) = mpsc::channel(capacity);

    let reader = ChannelReader::new(input_rx);
    let writer = ChunkWriter::new(output_tx.clone(), options.chunk_size);
    let max_dimension = options.max_dimension;

    let span = tracing::Span::current();
    let stage_span = span.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let _entered = stage_span.enter();
        stage::run(request, reader, writer, max_dimension);
    });

    // Surface a panicking stage on the body instead of ending it cleanly.
    tokio::spawn(
        async move {
            if let Err(e) = handle.await {
                error!(error = %e, "conversion stage panicked");
                let _ = output_tx
                    .send(Err(ConvertError::stream("conversion stage panicked")))
                    .await;
            }
        }
        .instrument(span),
    );

    let deadline = options.timeout.map(|t| Instant::now() + t);
    let result = ConversionResult {
        content_type: request.format.content_type(),
        filename: suggested_filename(original_filename, request.format),
        body: OutputStream::new(output_rx, deadline),
    };
    (InputSink::new(input_tx), result)
}
