//! `/convert`: format listing and single-file streaming conversion.
//!
//! `POST /convert` validates the query string before touching the body,
//! then hands the multipart stream to an [`UploadController`] running in its
//! own task. The handler waits on the completion latch and answers with
//! whatever the controller settled first: either the committed `200` with a
//! streamed body, or a plain-text error.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use imgconv_core::{ConversionRequest, ConvertError};
use serde::Serialize;
use tracing::{Instrument, Span, debug, warn};
use utoipa::{OpenApi, ToSchema};

use crate::error::ServerError;
use crate::latch::{CompletionLatch, Settlement};
use crate::response;
use crate::state::AppState;
use crate::upload::UploadController;

const NOT_MULTIPART: &str = "Use multipart/form-data with a \"file\" field.";

#[derive(OpenApi)]
#[openapi(
    paths(list_formats, convert),
    components(schemas(SupportedFormats, ConvertUpload))
)]
pub struct ConvertApi;

pub fn router(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    Router::new().route(
        "/convert",
        get(list_formats)
            .post(convert)
            .layer(DefaultBodyLimit::max(max_upload_bytes)),
    )
}

/// Output formats a client may request.
#[derive(Debug, Serialize, ToSchema)]
pub struct SupportedFormats {
    /// Format identifiers, e.g. `["jpeg", "png", "webp", "tiff"]`.
    pub supported: Vec<String>,
}

/// Multipart upload for `POST /convert`.
#[derive(ToSchema)]
#[allow(dead_code)] // only read by the utoipa schema derive
pub struct ConvertUpload {
    /// The image to convert. Only the first file part is used.
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[utoipa::path(
    get,
    path = "/convert",
    tag = "convert",
    responses(
        (status = 200, description = "Formats the server can encode", body = SupportedFormats)
    )
)]
pub async fn list_formats(State(state): State<Arc<AppState>>) -> Json<SupportedFormats> {
    let supported = state
        .registry
        .requestable()
        .into_iter()
        .map(|f| f.id().to_owned())
        .collect();
    Json(SupportedFormats { supported })
}

/// Convert one uploaded image and stream the result back.
#[utoipa::path(
    post,
    path = "/convert",
    tag = "convert",
    params(
        ("format" = Option<String>, Query, description = "jpeg, jpg, png, webp or tiff (default webp)"),
        ("quality" = Option<i32>, Query, description = "Encoder quality, default 80"),
        ("w" = Option<u32>, Query, description = "Target width in pixels"),
        ("h" = Option<u32>, Query, description = "Target height in pixels"),
    ),
    request_body(content = ConvertUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Converted image, streamed as an attachment"),
        (status = 400, description = "Invalid request or conversion failure", body = String, content_type = "text/plain"),
        (status = 500, description = "Internal error"),
    )
)]
pub async fn convert(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
) -> Result<Response, ServerError> {
    if !is_multipart(&request) {
        return Err(ServerError::BadRequest(NOT_MULTIPART.into()));
    }

    let conversion =
        ConversionRequest::from_params(&params, state.registry, state.config.max_dimension)?;

    // The content type is already multipart here, so a rejection means the
    // framing itself is unusable (e.g. no boundary).
    let multipart = Multipart::from_request(request, &state).await.map_err(|e| {
        debug!(error = %e.body_text(), "multipart extractor rejected request");
        ServerError::Conversion(ConvertError::stream(e.body_text()))
    })?;

    let (latch, settled) = CompletionLatch::new();
    let controller = UploadController::new(
        conversion,
        state.pipeline.clone(),
        state.config.timeout(),
        latch,
    );
    tokio::spawn(controller.run(multipart).instrument(Span::current()));

    match settled.await {
        Ok(Settlement::Converted(result)) => response::assemble(result),
        Ok(Settlement::Failed(e)) => Err(e.into()),
        Err(_) => {
            warn!("upload controller exited without settling");
            Err(ServerError::Internal(
                "upload controller exited without settling".into(),
            ))
        }
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.trim_start()
                .to_ascii_lowercase()
                .starts_with("multipart/form-data")
        })
}
