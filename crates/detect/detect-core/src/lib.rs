//! Leaf components of the detection pipeline: the blind frame decoder, the
//! detector and tracker seams, and deterministic detection-to-track
//! matching.

pub mod decoder;
pub mod detector;
pub mod matching;
pub mod tracker;

pub use decoder::FrameDecoder;
pub use detector::{Detector, DetectorError, NullDetector, RawDetection, TimedDetector};
pub use matching::{IOU_MATCH_THRESHOLD, assign_track_ids, iou};
pub use tracker::{IouTracker, Track, Tracker};
