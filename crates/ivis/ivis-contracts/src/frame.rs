use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reference into the shared-memory ring carried inside a frame contract.
///
/// `key` is the stringified slot index; `generation` is the slot's
/// post-write generation; `size` must equal `width * height * 3`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMemoryRef {
    pub backend: String,
    pub key: String,
    pub size: u64,
    pub generation: u32,
}

/// Strict v1 frame contract published once per frame.
///
/// `frame_id` is the content-addressed hash of
/// `(stream_id, pts, perceptual fingerprint)` and exists solely so results
/// can be correlated by identity rather than ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameContractV1 {
    pub contract_version: u32,
    pub frame_id: String,
    pub stream_id: String,
    #[serde(default)]
    pub camera_id: String,
    pub pts: f64,
    pub timestamp_ms: i64,
    pub mono_ms: i64,
    pub memory: FrameMemoryRef,
    pub frame_width: u32,
    pub frame_height: u32,
    pub frame_channels: u32,
    pub frame_dtype: String,
    pub frame_color_space: String,
}

impl FrameContractV1 {
    /// Byte count of a raster with this contract's geometry.
    pub fn frame_bytes(&self) -> u64 {
        self.frame_width as u64 * self.frame_height as u64 * self.frame_channels as u64
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("frame contract serializes")
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample() -> FrameContractV1 {
        FrameContractV1 {
            contract_version: 1,
            frame_id: "f0".into(),
            stream_id: "cam-front".into(),
            camera_id: "cam0".into(),
            pts: 33.3,
            timestamp_ms: 1_700_000_000_000,
            mono_ms: 12_345,
            memory: FrameMemoryRef {
                backend: "shm_ring_v1".into(),
                key: "2".into(),
                size: 640 * 480 * 3,
                generation: 9,
            },
            frame_width: 640,
            frame_height: 480,
            frame_channels: 3,
            frame_dtype: "uint8".into(),
            frame_color_space: "bgr".into(),
        }
    }

    #[test]
    fn value_roundtrip() {
        let c = sample();
        let v = c.to_value();
        assert_eq!(v["memory"]["key"], "2");
        assert_eq!(FrameContractV1::from_value(v).unwrap(), c);
    }

    #[test]
    fn frame_bytes_matches_geometry() {
        assert_eq!(sample().frame_bytes(), 921_600);
    }
}
