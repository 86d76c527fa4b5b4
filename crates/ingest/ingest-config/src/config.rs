use std::env;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceColor {
    Bgr,
    Rgb,
}

impl FromStr for SourceColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bgr" => Ok(SourceColor::Bgr),
            "rgb" => Ok(SourceColor::Rgb),
            other => Err(format!("unknown source color '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SelectorMode {
    Clock,
    Pts,
}

impl FromStr for SelectorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "clock" => Ok(SelectorMode::Clock),
            "pts" => Ok(SelectorMode::Pts),
            other => Err(format!("unknown selector mode '{other}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct IngestConfig {
    #[serde(default = "defaults::source_url")]
    pub source_url: String,
    #[serde(default = "defaults::stream_id")]
    pub stream_id: String,
    #[serde(default = "defaults::camera_id")]
    pub camera_id: String,
    #[serde(default = "defaults::target_fps")]
    pub target_fps: f64,
    #[serde(default = "defaults::frame_width")]
    pub frame_width: u32,
    #[serde(default = "defaults::frame_height")]
    pub frame_height: u32,
    #[serde(default = "defaults::source_color")]
    pub source_color: SourceColor,
    #[serde(default)]
    pub video_loop: bool,
    #[serde(default = "defaults::selector_mode")]
    pub selector_mode: SelectorMode,

    #[serde(default = "defaults::memory_backend")]
    pub memory_backend: String,
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

    #[serde(default = "defaults::frames_endpoint")]
    pub frames_endpoint: String,
    #[serde(default = "defaults::results_endpoint")]
    pub results_endpoint: String,

    #[serde(default)]
    pub adaptive_fps: bool,
    #[serde(default = "defaults::adaptive_min_fps")]
    pub adaptive_min_fps: f64,
    #[serde(default = "defaults::adaptive_max_fps")]
    pub adaptive_max_fps: f64,
    #[serde(default = "defaults::adaptive_safety")]
    pub adaptive_safety: f64,
    #[serde(default)]
    pub adaptive_lag_threshold: u64,
    #[serde(default = "defaults::adaptive_lag_hysteresis")]
    pub adaptive_lag_hysteresis: f64,

    #[serde(default = "defaults::reconnect_min_sec")]
    pub reconnect_min_sec: f64,
    #[serde(default = "defaults::reconnect_max_sec")]
    pub reconnect_max_sec: f64,
    #[serde(default = "defaults::reconnect_factor")]
    pub reconnect_factor: f64,
    #[serde(default = "defaults::reconnect_jitter")]
    pub reconnect_jitter: f64,
    #[serde(default)]
    pub reconnect_max_retries: u32,

    #[serde(default = "defaults::frozen_timeout_sec")]
    pub frozen_timeout_sec: f64,
    #[serde(default = "defaults::frozen_hash_count")]
    pub frozen_hash_count: u32,
    #[serde(default = "defaults::frozen_pts_count")]
    pub frozen_pts_count: u32,
    #[serde(default = "defaults::frozen_timestamp_count")]
    pub frozen_timestamp_count: u32,

    #[serde(default)]
    pub roi_boxes: Option<String>,
    #[serde(default)]
    pub roi_polygons: Option<String>,

    #[serde(default)]
    pub record_buffer_seconds: f64,
    #[serde(default)]
    pub record_buffer_max_frames: Option<u32>,
    #[serde(default = "defaults::record_jpeg_quality")]
    pub record_jpeg_quality: u8,
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
    use super::{SelectorMode, SourceColor};

    pub fn source_url() -> String {
        "pattern://default".into()
    }

    pub fn stream_id() -> String {
        "stream-0".into()
    }

    pub fn camera_id() -> String {
        "camera-0".into()
    }

    pub fn target_fps() -> f64 {
        15.0
    }

    pub fn frame_width() -> u32 {
        640
    }

    pub fn frame_height() -> u32 {
        480
    }

    pub fn source_color() -> SourceColor {
        SourceColor::Bgr
    }

    pub fn selector_mode() -> SelectorMode {
        SelectorMode::Clock
    }

    pub fn memory_backend() -> String {
        "shm".into()
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

    pub fn frames_endpoint() -> String {
        "127.0.0.1:5555".into()
    }

    pub fn results_endpoint() -> String {
        "127.0.0.1:5557".into()
    }

    pub fn adaptive_min_fps() -> f64 {
        1.0
    }

    pub fn adaptive_max_fps() -> f64 {
        30.0
    }

    pub fn adaptive_safety() -> f64 {
        1.3
    }

    pub fn adaptive_lag_hysteresis() -> f64 {
        0.2
    }

    pub fn reconnect_min_sec() -> f64 {
        0.5
    }

    pub fn reconnect_max_sec() -> f64 {
        30.0
    }

    pub fn reconnect_factor() -> f64 {
        2.0
    }

    pub fn reconnect_jitter() -> f64 {
        0.1
    }

    pub fn frozen_timeout_sec() -> f64 {
        10.0
    }

    pub fn frozen_hash_count() -> u32 {
        300
    }

    pub fn frozen_pts_count() -> u32 {
        300
    }

    pub fn frozen_timestamp_count() -> u32 {
        300
    }

    pub fn record_jpeg_quality() -> u8 {
        85
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

fn env_flag(var: &str, target: &mut bool) {
    if let Ok(raw) = env::var(var) {
        *target = matches!(raw.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
    }
}

impl IngestConfig {
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: IngestConfig = toml::from_str(&raw)?;
        Ok(config)
    }

    /// All-defaults config; callers usually follow with [`overlay_env`].
    ///
    /// [`overlay_env`]: IngestConfig::overlay_env
    pub fn defaults() -> Self {
        toml::from_str("").expect("defaults deserialize")
    }

    /// Applies the operator environment on top of the loaded values.
    ///
    /// The deprecated `FRAME_COLOR` variable is honored as the source color
    /// when `SOURCE_COLOR` is absent, with a warning.
    pub fn overlay_env(&mut self) -> Result<(), ConfigError> {
        env_parse("RTSP_URL", &mut self.source_url)?;
        env_parse("STREAM_ID", &mut self.stream_id)?;
        env_parse("CAMERA_ID", &mut self.camera_id)?;
        env_parse("TARGET_FPS", &mut self.target_fps)?;
        env_parse("FRAME_WIDTH", &mut self.frame_width)?;
        env_parse("FRAME_HEIGHT", &mut self.frame_height)?;
        env_flag("VIDEO_LOOP", &mut self.video_loop);

        if env::var("SOURCE_COLOR").is_ok() {
            env_parse("SOURCE_COLOR", &mut self.source_color)?;
        } else if env::var("FRAME_COLOR").is_ok() {
            warn!("FRAME_COLOR is deprecated; mapped to SOURCE_COLOR (output stays bgr)");
            env_parse("FRAME_COLOR", &mut self.source_color)?;
        }

        env_parse("SELECTOR_MODE", &mut self.selector_mode)?;
        env_parse("MEMORY_BACKEND", &mut self.memory_backend)?;
        env_parse("SHM_NAME", &mut self.shm_name)?;
        env_parse("SHM_META_NAME", &mut self.shm_meta_name)?;
        env_parse("SHM_BUFFER_BYTES", &mut self.shm_buffer_bytes)?;
        env_parse("SHM_CACHE_SECONDS", &mut self.shm_cache_seconds)?;
        env_parse("SHM_CACHE_FPS", &mut self.shm_cache_fps)?;
        env_parse("BUS_FRAMES_ENDPOINT", &mut self.frames_endpoint)?;
        env_parse("BUS_RESULTS_ENDPOINT", &mut self.results_endpoint)?;

        env_flag("ADAPTIVE_FPS", &mut self.adaptive_fps);
        env_parse("ADAPTIVE_MIN_FPS", &mut self.adaptive_min_fps)?;
        env_parse("ADAPTIVE_MAX_FPS", &mut self.adaptive_max_fps)?;
        env_parse("ADAPTIVE_SAFETY", &mut self.adaptive_safety)?;
        env_parse("ADAPTIVE_LAG_THRESHOLD", &mut self.adaptive_lag_threshold)?;
        env_parse("ADAPTIVE_LAG_HYSTERESIS", &mut self.adaptive_lag_hysteresis)?;

        env_parse("RTSP_RECONNECT_MIN_SEC", &mut self.reconnect_min_sec)?;
        env_parse("RTSP_RECONNECT_MAX_SEC", &mut self.reconnect_max_sec)?;
        env_parse("RTSP_RECONNECT_FACTOR", &mut self.reconnect_factor)?;
        env_parse("RTSP_RECONNECT_JITTER", &mut self.reconnect_jitter)?;
        env_parse("RTSP_MAX_RETRIES", &mut self.reconnect_max_retries)?;

        env_parse("RTSP_FROZEN_TIMEOUT_SEC", &mut self.frozen_timeout_sec)?;
        env_parse("RTSP_FROZEN_HASH_COUNT", &mut self.frozen_hash_count)?;
        env_parse("RTSP_FROZEN_PTS_COUNT", &mut self.frozen_pts_count)?;
        env_parse("RTSP_FROZEN_TIMESTAMP_COUNT", &mut self.frozen_timestamp_count)?;

        if let Ok(raw) = env::var("ROI_BOXES") {
            self.roi_boxes = (!raw.is_empty()).then_some(raw);
        }
        if let Ok(raw) = env::var("ROI_POLYGONS") {
            self.roi_polygons = (!raw.is_empty()).then_some(raw);
        }

        env_parse("RECORD_BUFFER_SECONDS", &mut self.record_buffer_seconds)?;
        if let Ok(raw) = env::var("RECORD_BUFFER_MAX_FRAMES") {
            if !raw.is_empty() {
                let parsed = raw.parse().map_err(|_| ConfigError::BadEnv {
                    var: "RECORD_BUFFER_MAX_FRAMES".into(),
                    value: raw,
                })?;
                self.record_buffer_max_frames = Some(parsed);
            }
        }
        env_parse("RECORD_JPEG_QUALITY", &mut self.record_jpeg_quality)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| {
            Err(ConfigError::Invalid {
                field: field.into(),
                message: message.into(),
            })
        };
        if self.memory_backend != "shm" {
            return invalid("memory_backend", "only the shm backend is supported");
        }
        for (field, dim) in [
            ("frame_width", self.frame_width),
            ("frame_height", self.frame_height),
        ] {
            if !(16..=10_000).contains(&dim) {
                return invalid(field, "must be within 16..=10000");
            }
        }
        if self.target_fps < 1.0 {
            return invalid("target_fps", "must be at least 1");
        }
        if !(1..=100).contains(&self.record_jpeg_quality) {
            return invalid("record_jpeg_quality", "must be within 1..=100");
        }
        if self.adaptive_max_fps < self.adaptive_min_fps {
            return invalid("adaptive_max_fps", "must be >= adaptive_min_fps");
        }
        Ok(())
    }

    /// Bytes of one BGR8 frame; also the ring slot size.
    pub fn slot_size(&self) -> u32 {
        self.frame_width * self.frame_height * 3
    }

    /// Ring depth. Derived from the cache window when both knobs are set,
    /// otherwise from the byte budget; every attaching process computes the
    /// same value from the same settings.
    pub fn slot_count(&self) -> u32 {
        if self.shm_cache_seconds > 0.0 && self.shm_cache_fps > 0.0 {
            ((self.shm_cache_seconds * self.shm_cache_fps) as u32).max(1)
        } else {
            ((self.shm_buffer_bytes / self.slot_size() as u64) as u32).max(1)
        }
    }

    /// One-line redacted summary for the startup log.
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
    fn defaults_are_valid() {
        let config = IngestConfig::defaults();
        config.validate().unwrap();
        assert_eq!(config.frame_width, 640);
        assert_eq!(config.slot_size(), 921_600);
        // 50 MB budget over 921600-byte slots
        assert_eq!(config.slot_count(), 54);
    }

    #[test]
    fn cache_window_overrides_byte_budget() {
        let mut config = IngestConfig::defaults();
        config.shm_cache_seconds = 2.0;
        config.shm_cache_fps = 15.0;
        assert_eq!(config.slot_count(), 30);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config: IngestConfig = toml::from_str(
            r#"
            stream_id = "lobby"
            target_fps = 10.0
            selector_mode = "pts"
            source_color = "rgb"
            "#,
        )
        .unwrap();
        assert_eq!(config.stream_id, "lobby");
        assert_eq!(config.selector_mode, SelectorMode::Pts);
        assert_eq!(config.source_color, SourceColor::Rgb);
        assert_eq!(config.frame_height, 480);
    }

    #[test]
    fn validation_rejects_bad_geometry() {
        let mut config = IngestConfig::defaults();
        config.frame_width = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn summary_is_json() {
        let config = IngestConfig::defaults();
        let summary = config.summary();
        let parsed: serde_json::Value = serde_json::from_str(&summary).unwrap();
        assert_eq!(parsed["stream_id"], "stream-0");
    }
}
