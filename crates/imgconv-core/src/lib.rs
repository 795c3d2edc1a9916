//! imgconv-core – format negotiation and the streaming conversion pipeline.
//!
//! This crate knows nothing about HTTP. It validates conversion parameters
//! ([`ConversionRequest`]), reports what the codec can write
//! ([`FormatRegistry`]), and turns a stream of upload chunks into a stream
//! of encoded output ([`pipeline::start`]).

mod error;
mod format;
mod naming;
mod request;

pub mod pipeline;

pub use error::{ConvertError, ConvertErrorKind};
pub use format::{ACCEPTED_INPUT_MIME, FormatRegistry, OutputFormat, is_accepted_input};
pub use naming::suggested_filename;
pub use pipeline::{ConversionResult, InputSink, OutputStream, PipelineOptions};
pub use request::{ALLOWED_FORMATS, ConversionRequest, DEFAULT_QUALITY};
