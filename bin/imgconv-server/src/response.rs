//! Turns a [`ConversionResult`] into the streamed HTTP response.

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use imgconv_core::ConversionResult;

use crate::error::ServerError;

/// `attachment; filename="<name>"` for an already-sanitized filename.
pub fn content_disposition(filename: &str) -> String {
    format!("attachment; filename=\"{filename}\"")
}

/// Build the `200` response whose body is the pipeline output.
///
/// Headers are fixed here; a codec failure after this point can only cut
/// the body short.
pub fn assemble(result: ConversionResult) -> Result<Response, ServerError> {
    let disposition = HeaderValue::from_str(&content_disposition(&result.filename))
        .map_err(|e| ServerError::Internal(format!("invalid content-disposition: {e}")))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, result.content_type)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(result.body))
        .map_err(|e| ServerError::Internal(format!("failed to build response: {e}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn disposition_quotes_the_filename() {
        assert_eq!(content_disposition("cat.webp"), "attachment; filename=\"cat.webp\"");
    }
}
