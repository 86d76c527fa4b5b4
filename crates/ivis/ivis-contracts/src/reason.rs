use std::fmt;

use thiserror::Error;

/// Stable machine-readable rejection reasons.
///
/// The snake_case rendering of a reason is the key consumers use for their
/// per-reason drop counters, so variants must never be renamed casually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    NotAnObject,
    ContractVersionMismatch,
    MissingMemory,
    MissingMemoryField,
    BadMemoryBackend,
    BadMemoryKey,
    BadMemorySize,
    BadMemoryGeneration,
    MemorySizeMismatch,
    BadDimensions,
    DimensionOutOfRange,
    BadChannels,
    UnsupportedChannels,
    BadDtype,
    UnsupportedDtype,
    BadColorSpace,
    UnsupportedColorSpace,
    BadFrameId,
    BadStreamId,
    MissingIdField,
    BadPts,
    BadTimestampMs,
    BadMonoMs,
    MissingDetections,
    BadDetections,
    BadDetectionEntry,
    BadBbox,
    BadConfidence,
    MissingClassId,
    MissingModel,
    BadModelName,
    BadModelThreshold,
    BadModelInputSize,
    MissingTiming,
    BadTiming,
}

impl ReasonCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasonCode::NotAnObject => "not_an_object",
            ReasonCode::ContractVersionMismatch => "contract_version_mismatch",
            ReasonCode::MissingMemory => "missing_memory",
            ReasonCode::MissingMemoryField => "missing_memory_field",
            ReasonCode::BadMemoryBackend => "bad_memory_backend",
            ReasonCode::BadMemoryKey => "bad_memory_key",
            ReasonCode::BadMemorySize => "bad_memory_size",
            ReasonCode::BadMemoryGeneration => "bad_memory_generation",
            ReasonCode::MemorySizeMismatch => "memory_size_mismatch",
            ReasonCode::BadDimensions => "bad_dimensions",
            ReasonCode::DimensionOutOfRange => "dimension_out_of_range",
            ReasonCode::BadChannels => "bad_channels",
            ReasonCode::UnsupportedChannels => "unsupported_channels",
            ReasonCode::BadDtype => "bad_dtype",
            ReasonCode::UnsupportedDtype => "unsupported_dtype",
            ReasonCode::BadColorSpace => "bad_color_space",
            ReasonCode::UnsupportedColorSpace => "unsupported_color_space",
            ReasonCode::BadFrameId => "bad_frame_id",
            ReasonCode::BadStreamId => "bad_stream_id",
            ReasonCode::MissingIdField => "missing_id_field",
            ReasonCode::BadPts => "bad_pts",
            ReasonCode::BadTimestampMs => "bad_timestamp_ms",
            ReasonCode::BadMonoMs => "bad_mono_ms",
            ReasonCode::MissingDetections => "missing_detections",
            ReasonCode::BadDetections => "bad_detections",
            ReasonCode::BadDetectionEntry => "bad_detection_entry",
            ReasonCode::BadBbox => "bad_bbox",
            ReasonCode::BadConfidence => "bad_confidence",
            ReasonCode::MissingClassId => "missing_class_id",
            ReasonCode::MissingModel => "missing_model",
            ReasonCode::BadModelName => "bad_model_name",
            ReasonCode::BadModelThreshold => "bad_model_threshold",
            ReasonCode::BadModelInputSize => "bad_model_input_size",
            ReasonCode::MissingTiming => "missing_timing",
            ReasonCode::BadTiming => "bad_timing",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contract that failed validation, with the reason the counter should be
/// keyed by and a human-readable message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason_code}: {message}")]
pub struct ContractValidationError {
    pub reason_code: ReasonCode,
    pub message: String,
}

impl ContractValidationError {
    pub fn new(reason_code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            reason_code,
            message: message.into(),
        }
    }
}
