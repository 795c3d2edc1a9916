//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use imgconv_core::{FormatRegistry, PipelineOptions};

use crate::config::Config;

/// State shared across all HTTP handlers. Read-only after startup.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Output formats the codec can write.
    pub registry: &'static FormatRegistry,
    /// Options every conversion pipeline is started with.
    pub pipeline: PipelineOptions,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_registry(config, FormatRegistry::global())
    }

    pub fn with_registry(config: Config, registry: &'static FormatRegistry) -> Self {
        let pipeline = config.pipeline_options();
        Self {
            config: Arc::new(config),
            registry,
            pipeline,
        }
    }
}
