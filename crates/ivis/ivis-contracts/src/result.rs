use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One detection, optionally carrying the track it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Axis-aligned `[x1, y1, x2, y2]` in frame pixels.
    pub bbox: [f64; 4],
    /// Confidence in `[0, 1]`.
    pub conf: f64,
    pub class_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    /// `[h, w]` or `[h, w, c]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_size: Option<Vec<u32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub inference_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_ms: Option<f64>,
}

/// Strict v1 result contract: detections and tracks for one `frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultContractV1 {
    pub contract_version: u32,
    pub frame_id: String,
    pub stream_id: String,
    pub camera_id: String,
    pub timestamp_ms: i64,
    pub mono_ms: i64,
    pub detections: Vec<Detection>,
    pub model: ModelInfo,
    pub timing: Timing,
}

impl ResultContractV1 {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("result contract serializes")
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample() -> ResultContractV1 {
        ResultContractV1 {
            contract_version: 1,
            frame_id: "f0".into(),
            stream_id: "cam-front".into(),
            camera_id: "cam0".into(),
            timestamp_ms: 1_700_000_000_123,
            mono_ms: 12_378,
            detections: vec![Detection {
                bbox: [10.0, 10.0, 20.0, 20.0],
                conf: 0.9,
                class_id: 1,
                class_name: Some("person".into()),
                track_id: Some(7),
            }],
            model: ModelInfo {
                name: "null".into(),
                version: "0".into(),
                threshold: Some(0.25),
                input_size: Some(vec![480, 640]),
            },
            timing: Timing {
                inference_ms: 4.2,
                model_ms: Some(3.9),
                track_ms: Some(0.3),
            },
        }
    }

    #[test]
    fn value_roundtrip() {
        let r = sample();
        let v = r.to_value();
        assert_eq!(v["detections"][0]["track_id"], 7);
        assert_eq!(ResultContractV1::from_value(v).unwrap(), r);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let mut r = sample();
        r.detections[0].track_id = None;
        r.detections[0].class_name = None;
        let v = r.to_value();
        assert!(v["detections"][0].get("track_id").is_none());
        assert!(v["detections"][0].get("class_name").is_none());
    }
}
