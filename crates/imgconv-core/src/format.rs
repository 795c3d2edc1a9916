//! Output formats and the process-wide registry of what the codec can write.

use std::sync::LazyLock;

use image::ImageFormat;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// MIME types accepted for the uploaded file.
pub const ACCEPTED_INPUT_MIME: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/tiff",
    "image/heic",
    "image/heif",
];

/// Returns `true` when `mime` (already lowercased) may be decoded.
pub fn is_accepted_input(mime: &str) -> bool {
    ACCEPTED_INPUT_MIME.contains(&mime)
}

/// An output format a client may request.
///
/// Parsing is case-insensitive and accepts `jpg` as an alias for `jpeg`;
/// `Display` always yields the canonical identifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, EnumIter,
)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    #[strum(to_string = "jpeg", serialize = "jpg")]
    Jpeg,
    #[strum(to_string = "png")]
    Png,
    #[default]
    #[strum(to_string = "webp")]
    Webp,
    #[strum(to_string = "tiff")]
    Tiff,
}

impl OutputFormat {
    /// Canonical identifier, as used in the registry and `GET /convert`.
    pub fn id(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Tiff => "tiff",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            OutputFormat::Tiff => "image/tiff",
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
        }
    }

    /// File extension including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => ".jpg",
            OutputFormat::Png => ".png",
            OutputFormat::Webp => ".webp",
            OutputFormat::Tiff => ".tiff",
        }
    }

    pub fn image_format(self) -> ImageFormat {
        match self {
            OutputFormat::Jpeg => ImageFormat::Jpeg,
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Webp => ImageFormat::WebP,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

static GLOBAL_REGISTRY: LazyLock<FormatRegistry> = LazyLock::new(FormatRegistry::from_codec);

/// Immutable set of format identifiers the codec can encode.
///
/// Built once per process by [`FormatRegistry::global`]; identifiers keep the
/// codec's enumeration order so error messages are stable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRegistry {
    outputs: Vec<String>,
}

impl FormatRegistry {
    /// The process-wide registry, introspected from the codec on first use.
    pub fn global() -> &'static FormatRegistry {
        &GLOBAL_REGISTRY
    }

    /// Ask the codec which of its formats have a compiled-in encoder.
    pub fn from_codec() -> Self {
        let outputs = ImageFormat::all()
            .filter(|fmt| fmt.writing_enabled())
            .map(codec_format_id)
            .collect();
        Self { outputs }
    }

    /// Registry with an explicit set of identifiers.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut outputs: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into().to_ascii_lowercase();
            if !outputs.contains(&id) {
                outputs.push(id);
            }
        }
        Self { outputs }
    }

    /// Every output-capable identifier the codec reported.
    pub fn list_supported_output_formats(&self) -> &[String] {
        &self.outputs
    }

    pub fn contains(&self, id: &str) -> bool {
        self.outputs.iter().any(|o| o == id)
    }

    pub fn supports(&self, format: OutputFormat) -> bool {
        self.contains(format.id())
    }

    /// The requestable formats the codec can actually write, in
    /// [`OutputFormat`] declaration order.
    pub fn requestable(&self) -> Vec<OutputFormat> {
        OutputFormat::iter().filter(|f| self.supports(*f)).collect()
    }

    /// Human-readable list for error messages; `jpeg` is shown as `jpeg/jpg`.
    pub fn describe(&self) -> String {
        self.outputs
            .iter()
            .map(|id| if id == "jpeg" { "jpeg/jpg" } else { id.as_str() })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Lowercase identifier for a codec format, e.g. `WebP` → `webp`.
fn codec_format_id(fmt: ImageFormat) -> String {
    format!("{fmt:?}").to_ascii_lowercase()
}
