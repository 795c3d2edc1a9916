//! Upload stream controller.
//!
//! Walks the multipart body of one `POST /convert` request, enforcing
//! "exactly one file, exactly one response":
//!
//! ```text
//! AwaitingFile ──first file──▶ FileSeen ──accepted MIME──▶ Streaming ──body done──▶ Settled
//!      │                          │
//!      └── end / framing error ───┴── rejected MIME ─────────────────────────────▶ Settled
//! ```
//!
//! Every terminal event goes through the [`CompletionLatch`]; the first one
//! decides the HTTP response and the rest are absorbed. Parts that arrive
//! after settlement are drained without being processed.

use std::time::Duration;

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use imgconv_core::{
    ConversionRequest, ConvertError, InputSink, PipelineOptions, is_accepted_input, pipeline,
};
use tracing::{debug, info, warn};

use crate::latch::{CompletionLatch, Settlement};

/// Hard limit on file parts per request.
pub const MAX_FILES: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    AwaitingFile,
    FileSeen,
    Streaming,
    Settled,
}

pub struct UploadController {
    request: ConversionRequest,
    options: PipelineOptions,
    timeout: Option<Duration>,
    latch: CompletionLatch,
    state: UploadState,
    files_seen: usize,
}

impl UploadController {
    pub fn new(
        request: ConversionRequest,
        options: PipelineOptions,
        timeout: Option<Duration>,
        latch: CompletionLatch,
    ) -> Self {
        Self {
            request,
            options,
            timeout,
            latch,
            state: UploadState::AwaitingFile,
            files_seen: 0,
        }
    }

    /// Consume the multipart body until it ends, fails, or times out.
    pub async fn run(mut self, mut multipart: Multipart) {
        let completed = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(&mut multipart))
                .await
                .is_ok(),
            None => {
                self.drive(&mut multipart).await;
                true
            }
        };

        if !completed {
            warn!(state = ?self.state, "upload timed out");
            self.fail(ConvertError::stream("upload timed out"));
        }
        self.transition(UploadState::Settled);
        debug!(files = self.files_seen, "upload controller finished");
    }

    async fn drive(&mut self, multipart: &mut Multipart) {
        loop {
            let mut field = match multipart.next_field().await {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    self.framing_error(e);
                    return;
                }
            };

            if field.file_name().is_none() {
                debug!(name = field.name().unwrap_or_default(), "skipping non-file field");
                if let Err(e) = drain(&mut field).await {
                    self.framing_error(e);
                    return;
                }
                continue;
            }

            self.files_seen += 1;
            if self.files_seen > MAX_FILES || self.latch.is_settled() {
                if self.files_seen > MAX_FILES {
                    self.fail(ConvertError::MultiFile);
                }
                debug!(files = self.files_seen, "draining extra file part");
                if let Err(e) = drain(&mut field).await {
                    self.framing_error(e);
                    return;
                }
                continue;
            }

            self.transition(UploadState::FileSeen);
            let mime = declared_mime(&field);
            if !is_accepted_input(&mime) {
                let mime = if mime.is_empty() { "unknown".to_owned() } else { mime };
                warn!(%mime, "rejecting unsupported input");
                if let Err(e) = drain(&mut field).await {
                    debug!(error = %e, "error while draining rejected file");
                }
                self.fail(ConvertError::UnsupportedInput { mime });
                continue;
            }

            let filename = field.file_name().map(str::to_owned);
            let (sink, result) = pipeline::start(self.request, filename.as_deref(), &self.options);
            self.transition(UploadState::Streaming);
            info!(
                %mime,
                filename = filename.as_deref().unwrap_or_default(),
                format = %self.request.format,
                "file accepted; streaming conversion"
            );
            self.latch.settle(Settlement::Converted(result));

            if !pump(&mut field, sink).await {
                // The pipeline is gone or the body is broken: stop reading.
                return;
            }
        }

        self.fail(ConvertError::NoFile);
    }

    fn fail(&mut self, error: ConvertError) {
        let kind = error.kind();
        if self.latch.settle(Settlement::Failed(error)) {
            info!(%kind, "request settled with error");
            self.transition(UploadState::Settled);
        }
    }

    fn framing_error(&mut self, e: MultipartError) {
        warn!(error = %e, "multipart stream error");
        self.fail(ConvertError::stream(e.body_text()));
    }

    fn transition(&mut self, next: UploadState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "upload state");
            self.state = next;
        }
    }
}

/// MIME type of the part without parameters, lowercased. Empty if absent.
fn declared_mime(field: &Field<'_>) -> String {
    field
        .content_type()
        .and_then(|ct| ct.split(';').next())
        .map(|essence| essence.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Forward the file part into the pipeline. Returns `false` when the rest of
/// the body should not be read.
async fn pump(field: &mut Field<'_>, mut sink: InputSink) -> bool {
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = sink.send(chunk).await {
                    debug!(error = %e, sent = sink.bytes_sent(), "pipeline stopped accepting input");
                    return false;
                }
            }
            Ok(None) => return sink.finish().await.is_ok(),
            Err(e) => {
                warn!(error = %e, "upload stream failed mid-file");
                sink.abort(e.body_text()).await;
                return false;
            }
        }
    }
}

async fn drain(field: &mut Field<'_>) -> Result<(), MultipartError> {
    while field.chunk().await?.is_some() {}
    Ok(())
}

#[cfg(test)]
mod test {
    use axum::body::{Body, Bytes};
    use axum::extract::FromRequest;
    use axum::http::{Request, header};
    use futures::StreamExt;
    use imgconv_core::{ConvertErrorKind, OutputFormat};
    use tracing_test::traced_test;

    use super::*;
    use crate::test_support::{
        BOUNDARY, Part, multipart_body, multipart_content_type, png_fixture,
    };

    async fn multipart_from(body: Vec<u8>) -> Multipart {
        let request = Request::builder()
            .header(header::CONTENT_TYPE, multipart_content_type())
            .body(Body::from(body))
            .unwrap();
        Multipart::from_request(request, &()).await.unwrap()
    }

    async fn settle_body(body: Vec<u8>) -> Settlement {
        let multipart = multipart_from(body).await;
        let (latch, rx) = CompletionLatch::new();
        let request = ConversionRequest { format: OutputFormat::Jpeg, ..Default::default() };
        let controller = UploadController::new(request, PipelineOptions::default(), None, latch);
        tokio::spawn(controller.run(multipart));
        rx.await.expect("controller settles")
    }

    async fn settle(parts: &[Part<'_>]) -> Settlement {
        settle_body(multipart_body(parts)).await
    }

    fn failure(settlement: Settlement) -> ConvertError {
        match settlement {
            Settlement::Failed(e) => e,
            Settlement::Converted(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn no_file_settles_with_no_file_error() {
        let settlement = settle(&[Part::text("note", "just text")]).await;
        assert_eq!(failure(settlement), ConvertError::NoFile);
    }

    #[tokio::test]
    async fn empty_body_settles_with_no_file_error() {
        assert_eq!(failure(settle(&[]).await), ConvertError::NoFile);
    }

    #[tokio::test]
    async fn bmp_is_rejected_with_its_mime_type() {
        let settlement = settle(&[Part::file("old.bmp", "image/bmp", b"BM....".to_vec())]).await;
        assert_eq!(
            failure(settlement),
            ConvertError::UnsupportedInput { mime: "image/bmp".into() }
        );
    }

    #[tokio::test]
    async fn missing_mime_is_reported_as_unknown() {
        let settlement = settle(&[Part {
            name: "file",
            filename: Some("mystery"),
            content_type: None,
            data: vec![0; 16],
        }])
        .await;
        assert_eq!(
            failure(settlement),
            ConvertError::UnsupportedInput { mime: "unknown".into() }
        );
    }

    #[tokio::test]
    async fn first_acceptable_file_wins_over_a_second_file() {
        let settlement = settle(&[
            Part::text("caption", "ignored"),
            Part::file("first.png", "image/png", png_fixture(12, 8)),
            Part::file("second.png", "image/png", png_fixture(30, 30)),
        ])
        .await;
        let Settlement::Converted(result) = settlement else {
            panic!("expected conversion");
        };
        assert_eq!(result.filename, "first.jpg");
        assert_eq!(result.content_type, "image/jpeg");

        let mut body = result.body;
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
    }

    #[tokio::test]
    async fn rejected_first_file_is_not_overridden_by_second() {
        let settlement = settle(&[
            Part::file("a.gif", "image/gif", b"GIF89a".to_vec()),
            Part::file("b.png", "image/png", png_fixture(4, 4)),
        ])
        .await;
        assert_eq!(failure(settlement).kind(), ConvertErrorKind::UnsupportedInput);
    }

    #[tokio::test]
    async fn mime_parameters_and_case_are_ignored() {
        let settlement =
            settle(&[Part::file("x.png", "IMAGE/PNG; foo=bar", png_fixture(4, 4))]).await;
        assert!(matches!(settlement, Settlement::Converted(_)));
    }

    #[tokio::test]
    async fn truncated_multipart_is_a_stream_error() {
        let mut body = multipart_body(&[]);
        body.truncate(5);
        let e = failure(settle_body(body).await);
        assert_eq!(e.kind(), ConvertErrorKind::Stream);
    }

    #[tokio::test]
    #[traced_test]
    async fn rejection_is_logged_with_its_kind() {
        let multipart =
            multipart_from(multipart_body(&[Part::file("x.gif", "image/gif", b"GIF89a".to_vec())]))
                .await;
        let (latch, rx) = CompletionLatch::new();
        UploadController::new(ConversionRequest::default(), PipelineOptions::default(), None, latch)
            .run(multipart)
            .await;

        assert!(matches!(rx.await, Ok(Settlement::Failed(_))));
        assert!(logs_contain("rejecting unsupported input"));
        assert!(logs_contain("unsupported_input"));
    }

    #[tokio::test]
    async fn stalled_upload_times_out_before_any_file() {
        let preamble = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nwaiting"
        );
        let body = futures::stream::iter([Ok::<_, std::io::Error>(Bytes::from(preamble))])
            .chain(futures::stream::pending());
        let request = Request::builder()
            .header(header::CONTENT_TYPE, multipart_content_type())
            .body(Body::from_stream(body))
            .unwrap();
        let multipart = Multipart::from_request(request, &()).await.unwrap();

        let (latch, rx) = CompletionLatch::new();
        let controller = UploadController::new(
            ConversionRequest::default(),
            PipelineOptions::default(),
            Some(Duration::from_millis(50)),
            latch,
        );
        tokio::spawn(controller.run(multipart));

        let error = failure(rx.await.expect("controller settles"));
        assert_eq!(error.kind(), ConvertErrorKind::Stream);
        assert_eq!(error, ConvertError::stream("upload timed out"));
    }
}
