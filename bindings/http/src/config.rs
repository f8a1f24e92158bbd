use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use storyface::Settings;

use crate::error::ApiError;

/// Prefix for environment overrides, e.g. `STORYFACE__PORT=9000` or
/// `STORYFACE__PIPELINE__BLEND__MODE=seamless`.
pub const ENV_PREFIX: &str = "STORYFACE";

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Pipeline runs allowed at once.
    pub workers: usize,
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Per-file upload limit.
    pub max_upload_mb: usize,
    pub cleanup_max_age_hours: u64,
    pub cleanup_interval_secs: u64,
    pub request_timeout_ms: u64,
    /// How long a request waits for the detector to finish loading before
    /// answering 503.
    pub ready_wait_ms: u64,
    /// SeetaFace model file for the built-in detector.
    pub detector_model: Option<PathBuf>,
    pub min_face_size: u32,
    pub log_filter: String,
    pub ingest: IngestConfig,
    pub pipeline: Settings,
}

/// Normalization applied to uploaded photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_edge: u32,
    pub quality: f32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_edge: 1024,
            quality: 0.9,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            workers: 2,
            upload_dir: PathBuf::from("uploads"),
            output_dir: PathBuf::from("outputs"),
            max_upload_mb: 50,
            cleanup_max_age_hours: 24,
            cleanup_interval_secs: 3600,
            request_timeout_ms: 120_000,
            ready_wait_ms: 2_000,
            detector_model: None,
            min_face_size: 20,
            log_filter: "info".into(),
            ingest: IngestConfig::default(),
            pipeline: Settings::default(),
        }
    }
}

impl AppConfig {
    /// Layer the optional TOML file at `path` and `STORYFACE__*` variables
    /// over the defaults.
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let invalid = |msg: &str| Err(ApiError::InvalidConfig(msg.to_string()));
        if self.workers == 0 {
            return invalid("workers must be > 0");
        }
        if self.max_upload_mb == 0 {
            return invalid("max_upload_mb must be > 0");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be > 0");
        }
        if !(0.0..=1.0).contains(&self.ingest.quality) || self.ingest.max_edge == 0 {
            return invalid("ingest quality must be in 0.0..=1.0 and max_edge > 0");
        }
        self.pipeline.validate()?;
        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb * 1024 * 1024
    }
}
