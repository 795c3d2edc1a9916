//! Query-parameter validation for `POST /convert`.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::debug;

use crate::error::ConvertError;
use crate::format::{FormatRegistry, OutputFormat};

/// Quality used when the parameter is absent, zero, or not a number.
pub const DEFAULT_QUALITY: i32 = 80;

/// Formats a client may name, aliases included.
pub const ALLOWED_FORMATS: &[&str] = &["jpeg", "jpg", "png", "webp", "tiff"];

/// A validated conversion request.
///
/// Built once from the query string, before any of the body is read, and
/// never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionRequest {
    pub format: OutputFormat,
    /// Requested quality, unclamped. See [`ConversionRequest::encoder_quality`].
    pub quality: i32,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            quality: DEFAULT_QUALITY,
            width: None,
            height: None,
        }
    }
}

impl ConversionRequest {
    /// Validate raw query parameters (`format`, `quality`, `w`, `h`).
    ///
    /// `max_dimension` caps `w` and `h`; values above it are rejected.
    pub fn from_params(
        params: &HashMap<String, String>,
        registry: &FormatRegistry,
        max_dimension: u32,
    ) -> Result<Self, ConvertError> {
        let requested = params
            .get("format")
            .map(|f| f.trim().to_ascii_lowercase())
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| OutputFormat::default().to_string());

        let format = ALLOWED_FORMATS
            .contains(&requested.as_str())
            .then(|| OutputFormat::from_str(&requested).ok())
            .flatten()
            .filter(|f| registry.supports(*f))
            .ok_or_else(|| {
                ConvertError::Validation(format!(
                    "Unsupported output format \"{requested}\". Supported: {}",
                    registry.describe()
                ))
            })?;

        let quality = params
            .get("quality")
            .and_then(|q| parse_number(q))
            .filter(|q| q.is_finite() && *q != 0.0)
            .map(|q| q as i32)
            .unwrap_or(DEFAULT_QUALITY);

        let width = parse_dimension("w", params.get("w"), max_dimension)?;
        let height = parse_dimension("h", params.get("h"), max_dimension)?;

        debug!(%format, quality, ?width, ?height, "conversion parameters accepted");

        Ok(Self { format, quality, width, height })
    }

    /// Quality clamped to the 1–100 range the encoders understand.
    pub fn encoder_quality(&self) -> u8 {
        self.quality.clamp(1, 100) as u8
    }

    /// Whether a resize stage runs at all.
    pub fn wants_resize(&self) -> bool {
        self.width.is_some() || self.height.is_some()
    }
}

/// Lenient numeric parse: surrounding whitespace is ignored and an empty
/// string counts as zero. Returns `None` for anything that is not a finite
/// number, including spellings such as `inf` and `NaN`.
fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Absent, zero, or non-numeric values mean "no constraint".
fn parse_dimension(
    name: &str,
    raw: Option<&String>,
    max_dimension: u32,
) -> Result<Option<u32>, ConvertError> {
    let Some(value) = raw.and_then(|r| parse_number(r)) else {
        return Ok(None);
    };
    if value == 0.0 {
        return Ok(None);
    }
    if value < 0.0 || value.fract() != 0.0 {
        return Err(ConvertError::Validation(format!(
            "{name} must be a positive integer"
        )));
    }
    if value > f64::from(max_dimension) {
        return Err(ConvertError::Validation(format!(
            "{name} exceeds the maximum of {max_dimension} pixels"
        )));
    }
    Ok(Some(value as u32))
}
