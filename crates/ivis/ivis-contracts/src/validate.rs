//! Strict validators for the v1 contracts.
//!
//! Both validators take the decoded JSON by mutable reference: the only
//! mutation they perform is normalizing the deprecated `"1"` / `"v1"`
//! spellings of `contract_version` to the integer `1` (with a deprecation
//! warning). Everything else is read-only checking; the first violated rule
//! wins and its reason code is returned.

use serde_json::Value;
use tracing::warn;

use crate::reason::{ContractValidationError, ReasonCode};

const MIN_DIM: i64 = 16;
const MAX_DIM: i64 = 10_000;

type Checked = Result<(), ContractValidationError>;

fn fail(reason: ReasonCode, message: impl Into<String>) -> ContractValidationError {
    ContractValidationError::new(reason, message)
}

fn is_int(v: &Value) -> bool {
    v.is_i64() || v.is_u64()
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// Normalizes `contract_version` in place and checks it is the integer 1.
///
/// Booleans are rejected outright (they would otherwise coerce). Legacy
/// string spellings are accepted with a deprecation warning and rewritten.
fn check_contract_version(contract: &mut Value, what: &str) -> Checked {
    let cv = contract.get("contract_version");
    let normalized = match cv {
        Some(Value::Bool(_)) | None => None,
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.eq_ignore_ascii_case("v1") || trimmed == "1" {
                warn!(
                    "{what} contract_version {trimmed:?} is deprecated; use the integer 1"
                );
                Some(1)
            } else {
                None
            }
        }
        Some(v) => v.as_i64().filter(|&n| n == 1),
    };
    if normalized != Some(1) {
        return Err(fail(
            ReasonCode::ContractVersionMismatch,
            format!("unsupported {what} contract_version: {cv:?}"),
        ));
    }
    if contract.get("contract_version") != Some(&Value::from(1)) {
        contract["contract_version"] = Value::from(1);
    }
    Ok(())
}

fn check_timestamps(contract: &Value) -> Checked {
    if !contract.get("timestamp_ms").is_some_and(is_int) {
        return Err(fail(
            ReasonCode::BadTimestampMs,
            "timestamp_ms must be an integer (ms)",
        ));
    }
    if !contract.get("mono_ms").is_some_and(is_int) {
        return Err(fail(
            ReasonCode::BadMonoMs,
            "mono_ms must be an integer (ms)",
        ));
    }
    Ok(())
}

/// Validates a v1 frame contract strictly, normalizing the legacy version
/// spelling in place. On success the value is the identity of a valid
/// contract.
pub fn validate_frame_contract_v1(contract: &mut Value) -> Checked {
    if !contract.is_object() {
        return Err(fail(ReasonCode::NotAnObject, "contract must be an object"));
    }
    check_contract_version(contract, "frame")?;

    let memory = contract
        .get("memory")
        .filter(|m| m.is_object())
        .ok_or_else(|| fail(ReasonCode::MissingMemory, "memory must be an object"))?;
    for field in ["backend", "key", "size", "generation"] {
        if memory.get(field).is_none() {
            return Err(fail(
                ReasonCode::MissingMemoryField,
                format!("memory missing field '{field}'"),
            ));
        }
    }
    if non_empty_str(memory.get("backend")).is_none() {
        return Err(fail(
            ReasonCode::BadMemoryBackend,
            "memory.backend must be a non-empty string",
        ));
    }
    if non_empty_str(memory.get("key")).is_none() {
        return Err(fail(
            ReasonCode::BadMemoryKey,
            "memory.key must be a non-empty string",
        ));
    }
    let mem_size = memory.get("size").and_then(Value::as_i64);
    if memory.get("size").is_none_or(|v| !is_int(v)) || mem_size.is_some_and(|s| s < 0) {
        return Err(fail(
            ReasonCode::BadMemorySize,
            "memory.size must be a non-negative integer",
        ));
    }
    if !memory.get("generation").is_some_and(is_int) {
        return Err(fail(
            ReasonCode::BadMemoryGeneration,
            "memory.generation must be an integer",
        ));
    }

    let width = contract.get("frame_width").and_then(Value::as_i64);
    let height = contract.get("frame_height").and_then(Value::as_i64);
    for (name, dim) in [("frame_width", width), ("frame_height", height)] {
        match dim {
            Some(d) if d > 0 => {}
            _ => {
                return Err(fail(
                    ReasonCode::BadDimensions,
                    format!("{name} must be a positive integer"),
                ));
            }
        }
    }
    let (width, height) = (width.unwrap_or(0), height.unwrap_or(0));
    if !(MIN_DIM..=MAX_DIM).contains(&width) || !(MIN_DIM..=MAX_DIM).contains(&height) {
        return Err(fail(
            ReasonCode::DimensionOutOfRange,
            format!("width/height out of range: {width}x{height}"),
        ));
    }

    let channels = contract.get("frame_channels").and_then(Value::as_i64);
    match channels {
        Some(c) if c > 0 => {
            if c != 3 {
                return Err(fail(
                    ReasonCode::UnsupportedChannels,
                    format!("only 3 channels supported in v1; got {c}"),
                ));
            }
        }
        _ => {
            return Err(fail(
                ReasonCode::BadChannels,
                "frame_channels must be a positive integer",
            ));
        }
    }

    match non_empty_str(contract.get("frame_dtype")) {
        None => return Err(fail(ReasonCode::BadDtype, "frame_dtype must be a non-empty string")),
        Some(dtype) if !dtype.eq_ignore_ascii_case("uint8") => {
            return Err(fail(
                ReasonCode::UnsupportedDtype,
                format!("only uint8 supported in v1; got {dtype}"),
            ));
        }
        Some(_) => {}
    }
    match non_empty_str(contract.get("frame_color_space")) {
        None => {
            return Err(fail(
                ReasonCode::BadColorSpace,
                "frame_color_space must be a non-empty string",
            ));
        }
        Some(color) if !color.eq_ignore_ascii_case("bgr") => {
            return Err(fail(
                ReasonCode::UnsupportedColorSpace,
                format!("only bgr supported in v1; got {color}"),
            ));
        }
        Some(_) => {}
    }

    let expected = width * height * 3;
    if mem_size != Some(expected) {
        return Err(fail(
            ReasonCode::MemorySizeMismatch,
            format!("memory.size {mem_size:?} != expected {expected}"),
        ));
    }

    if non_empty_str(contract.get("frame_id")).is_none() {
        return Err(fail(
            ReasonCode::BadFrameId,
            "frame_id must be a non-empty string",
        ));
    }
    if non_empty_str(contract.get("stream_id")).is_none() {
        return Err(fail(
            ReasonCode::BadStreamId,
            "stream_id must be a non-empty string",
        ));
    }

    if let Some(pts) = contract.get("pts")
        && !pts.is_number()
    {
        return Err(fail(ReasonCode::BadPts, "pts must be numeric"));
    }
    check_timestamps(contract)
}

/// Validates a v1 result contract strictly, with the same legacy version
/// normalization as the frame validator.
pub fn validate_result_contract_v1(result: &mut Value) -> Checked {
    if !result.is_object() {
        return Err(fail(ReasonCode::NotAnObject, "result must be an object"));
    }
    check_contract_version(result, "result")?;

    for field in ["frame_id", "stream_id", "camera_id"] {
        if non_empty_str(result.get(field)).is_none() {
            return Err(fail(
                ReasonCode::MissingIdField,
                format!("{field} must be a non-empty string"),
            ));
        }
    }
    check_timestamps(result)?;

    let detections = match result.get("detections") {
        None | Some(Value::Null) => {
            return Err(fail(
                ReasonCode::MissingDetections,
                "detections must be present as a list",
            ));
        }
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(fail(ReasonCode::BadDetections, "detections must be a list"));
        }
    };
    for (i, det) in detections.iter().enumerate() {
        if !det.is_object() {
            return Err(fail(
                ReasonCode::BadDetectionEntry,
                format!("detection[{i}] must be an object"),
            ));
        }
        let bbox_ok = det
            .get("bbox")
            .and_then(Value::as_array)
            .is_some_and(|b| b.len() == 4 && b.iter().all(Value::is_number));
        if !bbox_ok {
            return Err(fail(
                ReasonCode::BadBbox,
                format!("detection[{i}].bbox must be [x1,y1,x2,y2]"),
            ));
        }
        let conf = det.get("conf").and_then(Value::as_f64);
        if !conf.is_some_and(|c| (0.0..=1.0).contains(&c)) {
            return Err(fail(
                ReasonCode::BadConfidence,
                format!("detection[{i}].conf must be within 0..1"),
            ));
        }
        if det.get("class_id").is_none() {
            return Err(fail(
                ReasonCode::MissingClassId,
                format!("detection[{i}] missing class_id"),
            ));
        }
    }

    let model = result
        .get("model")
        .filter(|m| m.is_object())
        .ok_or_else(|| fail(ReasonCode::MissingModel, "model metadata must be present"))?;
    if non_empty_str(model.get("name")).is_none() {
        return Err(fail(
            ReasonCode::BadModelName,
            "model.name must be a non-empty string",
        ));
    }
    if let Some(threshold) = model.get("threshold")
        && !threshold.is_number()
    {
        return Err(fail(
            ReasonCode::BadModelThreshold,
            "model.threshold must be numeric",
        ));
    }
    if let Some(input_size) = model.get("input_size") {
        let ok = input_size
            .as_array()
            .is_some_and(|a| a.len() == 2 || a.len() == 3);
        if !ok {
            return Err(fail(
                ReasonCode::BadModelInputSize,
                "model.input_size must be [h,w] or [h,w,c]",
            ));
        }
    }

    let timing = result
        .get("timing")
        .filter(|t| t.is_object())
        .ok_or_else(|| fail(ReasonCode::MissingTiming, "timing must be present"))?;
    if !timing.get("inference_ms").is_some_and(Value::is_number) {
        return Err(fail(
            ReasonCode::BadTiming,
            "timing.inference_ms must be present and numeric",
        ));
    }

    Ok(())
}
