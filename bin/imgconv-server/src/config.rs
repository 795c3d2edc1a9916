//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

use imgconv_core::PipelineOptions;

/// Runtime configuration for imgconv-server.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Largest accepted request body, multipart framing included.
    pub max_upload_bytes: usize,

    /// Per-request deadline in seconds; `0` disables it.
    pub timeout_secs: u64,

    /// Size of the chunks the converted image is streamed in.
    pub chunk_bytes: usize,

    /// Depth of the bounded channels between pipeline stages.
    pub channel_capacity: usize,

    /// Largest image edge, in pixels, that may be decoded or requested.
    pub max_dimension: u32,

    /// Comma-separated list of allowed CORS origins. `None` allows any.
    pub cors_allowed_origins: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_docs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".into(),
            log_level: "info".into(),
            log_json: false,
            max_upload_bytes: 100 * 1024 * 1024,
            timeout_secs: 120,
            chunk_bytes: 64 * 1024,
            channel_capacity: 8,
            max_dimension: 16_384,
            cors_allowed_origins: None,
            enable_docs: true,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: env_or("IMGCONV_BIND", &defaults.bind_address),
            log_level: env_or("IMGCONV_LOG", &defaults.log_level),
            log_json: parse_bool("IMGCONV_LOG_JSON", defaults.log_json),
            max_upload_bytes: parse_env("IMGCONV_MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            timeout_secs: parse_env("IMGCONV_TIMEOUT_SECS", defaults.timeout_secs),
            chunk_bytes: parse_env("IMGCONV_CHUNK_BYTES", defaults.chunk_bytes),
            channel_capacity: parse_env("IMGCONV_CHANNEL_CAPACITY", defaults.channel_capacity),
            max_dimension: parse_env("IMGCONV_MAX_DIMENSION", defaults.max_dimension),
            cors_allowed_origins: std::env::var("IMGCONV_CORS_ORIGINS")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            enable_docs: parse_bool("IMGCONV_ENABLE_DOCS", defaults.enable_docs),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Options handed to every conversion pipeline.
    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            chunk_size: self.chunk_bytes,
            channel_capacity: self.channel_capacity,
            max_dimension: self.max_dimension,
            timeout: self.timeout(),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
