use thiserror::Error;

use crate::format::ACCEPTED_INPUT_MIME;

/// Everything that can end a conversion request.
///
/// The variants mirror the points at which a request can fail: parameter
/// validation (before the body is read), the upload controller (input MIME,
/// file count, framing) and the codec stages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConvertError {
    /// Bad content type, unsupported output format, or malformed dimension.
    #[error("{0}")]
    Validation(String),

    /// The uploaded file declares a MIME type the decoder does not accept.
    #[error("Unsupported input \"{mime}\" (allowed: {})", ACCEPTED_INPUT_MIME.join(", "))]
    UnsupportedInput { mime: String },

    /// More than one file part in a single request.
    #[error("Send exactly one file per request")]
    MultiFile,

    /// The multipart body ended without a file part.
    #[error("No file received")]
    NoFile,

    /// I/O, multipart framing, or codec failure.
    #[error("{0}")]
    Stream(String),
}

/// Discriminant of [`ConvertError`], used for logging and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConvertErrorKind {
    Validation,
    UnsupportedInput,
    MultiFile,
    NoFile,
    Stream,
}

impl ConvertError {
    pub fn stream(message: impl Into<String>) -> Self {
        ConvertError::Stream(message.into())
    }

    pub fn kind(&self) -> ConvertErrorKind {
        match self {
            ConvertError::Validation(_) => ConvertErrorKind::Validation,
            ConvertError::UnsupportedInput { .. } => ConvertErrorKind::UnsupportedInput,
            ConvertError::MultiFile => ConvertErrorKind::MultiFile,
            ConvertError::NoFile => ConvertErrorKind::NoFile,
            ConvertError::Stream(_) => ConvertErrorKind::Stream,
        }
    }
}

impl From<image::ImageError> for ConvertError {
    fn from(e: image::ImageError) -> Self {
        ConvertError::Stream(e.to_string())
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Stream(e.to_string())
    }
}
