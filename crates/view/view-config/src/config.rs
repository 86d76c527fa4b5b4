use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ViewConfig {
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

    /// A cached result older than this relative to its frame renders as an
    /// empty overlay instead.
    #[serde(default = "defaults::max_result_age_ms")]
    pub max_result_age_ms: i64,
    /// Contract silence before the ring-fallback poller takes over.
    #[serde(default = "defaults::fallback_after_ms")]
    pub fallback_after_ms: i64,

    #[serde(default = "defaults::cache_max_entries")]
    pub cache_max_entries: usize,
    #[serde(default = "defaults::cache_ttl_seconds")]
    pub cache_ttl_seconds: f64,

    #[serde(default = "defaults::mjpeg_bind")]
    pub mjpeg_bind: String,
    #[serde(default = "defaults::jpeg_quality")]
    pub jpeg_quality: u8,
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

    pub fn max_result_age_ms() -> i64 {
        500
    }

    pub fn fallback_after_ms() -> i64 {
        500
    }

    pub fn cache_max_entries() -> usize {
        2_000
    }

    pub fn cache_ttl_seconds() -> f64 {
        60.0
    }

    pub fn mjpeg_bind() -> String {
        "127.0.0.1:8090".into()
    }

    pub fn jpeg_quality() -> u8 {
        80
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

impl ViewConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: ViewConfig = toml::from_str(&raw)?;
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
        env_parse("MAX_RESULT_AGE_MS", &mut self.max_result_age_ms)?;
        env_parse("UI_FALLBACK_AFTER_MS", &mut self.fallback_after_ms)?;
        env_parse("UI_RESULTS_CACHE_MAX", &mut self.cache_max_entries)?;
        env_parse("UI_RESULTS_CACHE_TTL_SEC", &mut self.cache_ttl_seconds)?;
        env_parse("MJPEG_BIND", &mut self.mjpeg_bind)?;
        env_parse("UI_JPEG_QUALITY", &mut self.jpeg_quality)?;
        Ok(())
    }

    pub fn slot_size(&self) -> u32 {
        self.frame_width * self.frame_height * 3
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = ViewConfig::defaults();
        assert_eq!(config.max_result_age_ms, 500);
        assert_eq!(config.cache_max_entries, 2_000);
        assert_eq!(config.slot_size(), 921_600);
    }
}
