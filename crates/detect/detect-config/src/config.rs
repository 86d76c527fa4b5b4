use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DetectConfig {
    #[serde(default = "defaults::frames_endpoint")]
    pub frames_endpoint: String,
    #[serde(default = "defaults::results_endpoint")]
    pub results_endpoint: String,

    #[serde(default = "defaults::frame_width")]
    pub frame_width: u32,
    #[serde(default = "defaults::frame_height")]
    pub frame_height: u32,

    #[serde(default = "defaults::shm_name")]
    pub shm_name: String,
    #[serde(default = "defaults::shm_meta_name")]
    pub shm_meta_name: String,
    #[serde(default = "defaults::shm_buffer_bytes")]
    pub shm_buffer_bytes: u64,
    #[serde(default)]
    pub shm_cache_seconds: f64,
    #[serde(default)]
    pub shm_cache_fps: f64,

    /// Frames older than this are dropped before any ring read or
    /// inference; zero disables the check.
    #[serde(default = "defaults::max_frame_age_ms")]
    pub max_frame_age_ms: i64,

    #[serde(default = "defaults::model_name")]
    pub model_name: String,
    #[serde(default)]
    pub model_version: String,
    #[serde(default = "defaults::model_threshold")]
    pub model_threshold: f64,

    /// Zero disables the inference watchdog.
    #[serde(default)]
    pub inference_timeout_sec: f64,

    #[serde(default = "defaults::tracker_max_age")]
    pub tracker_max_age: u32,
    #[serde(default = "defaults::tracker_init_frames")]
    pub tracker_init_frames: u32,
    #[serde(default = "defaults::tracker_iou_threshold")]
    pub tracker_iou_threshold: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("environment variable {var} has invalid value '{value}'")]
    BadEnv { var: String, value: String },

    #[error("invalid config: {field}: {message}")]
    Invalid { field: String, message: String },
}

mod defaults {
    pub fn frames_endpoint() -> String {
        "127.0.0.1:5555".into()
    }

    pub fn results_endpoint() -> String {
        "127.0.0.1:5557".into()
    }

    pub fn frame_width() -> u32 {
        640
    }

    pub fn frame_height() -> u32 {
        480
    }

    pub fn shm_name() -> String {
        "ivis_shm_data".into()
    }

    pub fn shm_meta_name() -> String {
        "ivis_shm_meta".into()
    }

    pub fn shm_buffer_bytes() -> u64 {
        50_000_000
    }

    pub fn max_frame_age_ms() -> i64 {
        1_000
    }

    pub fn model_name() -> String {
        "null".into()
    }

    pub fn model_threshold() -> f64 {
        0.25
    }

    pub fn tracker_max_age() -> u32 {
        30
    }

    pub fn tracker_init_frames() -> u32 {
        3
    }

    pub fn tracker_iou_threshold() -> f64 {
        0.3
    }
}

fn env_parse<T: FromStr>(var: &str, target: &mut T) -> Result<(), ConfigError> {
    if let Ok(raw) = env::var(var) {
        if raw.is_empty() {
            return Ok(());
        }
        *target = raw.parse().map_err(|_| ConfigError::BadEnv {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

impl DetectConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: DetectConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn defaults() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }

    pub fn overlay_env(&mut self) -> Result<(), ConfigError> {
        env_parse("BUS_FRAMES_ENDPOINT", &mut self.frames_endpoint)?;
        env_parse("BUS_RESULTS_ENDPOINT", &mut self.results_endpoint)?;
        env_parse("FRAME_WIDTH", &mut self.frame_width)?;
        env_parse("FRAME_HEIGHT", &mut self.frame_height)?;
        env_parse("SHM_NAME", &mut self.shm_name)?;
        env_parse("SHM_META_NAME", &mut self.shm_meta_name)?;
        env_parse("SHM_BUFFER_BYTES", &mut self.shm_buffer_bytes)?;
        env_parse("SHM_CACHE_SECONDS", &mut self.shm_cache_seconds)?;
        env_parse("SHM_CACHE_FPS", &mut self.shm_cache_fps)?;
        env_parse("MAX_FRAME_AGE_MS", &mut self.max_frame_age_ms)?;
        env_parse("MODEL_NAME", &mut self.model_name)?;
        env_parse("MODEL_VERSION", &mut self.model_version)?;
        env_parse("MODEL_THRESHOLD", &mut self.model_threshold)?;
        env_parse("INFERENCE_TIMEOUT_SEC", &mut self.inference_timeout_sec)?;
        env_parse("TRACKER_MAX_AGE", &mut self.tracker_max_age)?;
        env_parse("TRACKER_INIT_FRAMES", &mut self.tracker_init_frames)?;
        env_parse("TRACKER_IOU_THRESHOLD", &mut self.tracker_iou_threshold)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, dim) in [
            ("frame_width", self.frame_width),
            ("frame_height", self.frame_height),
        ] {
            if !(16..=10_000).contains(&dim) {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    message: "must be within 16..=10000".into(),
                });
            }
        }
        if self.model_name.is_empty() {
            return Err(ConfigError::Invalid {
                field: "model_name".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }

    pub fn slot_size(&self) -> u32 {
        self.frame_width * self.frame_height * 3
    }

    /// Must mirror the producer's derivation so the attach geometry
    /// matches.
    pub fn slot_count(&self) -> u32 {
        if self.shm_cache_seconds > 0.0 && self.shm_cache_fps > 0.0 {
            ((self.shm_cache_seconds * self.shm_cache_fps) as u32).max(1)
        } else {
            ((self.shm_buffer_bytes / self.slot_size() as u64) as u32).max(1)
        }
    }

    pub fn summary(&self) -> String {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        ivis_contracts::redact_value(&mut value);
        value.to_string()
    }
}
