//! Leaf components of the ingestion pipeline: capture sources, the frame
//! selector, normalization, ROI masking, perceptual fingerprinting, frozen
//! stream detection, reconnect backoff, adaptive rate control and the
//! rolling JPEG record buffer.

pub mod adaptive;
pub mod fingerprint;
pub mod frozen;
pub mod identity;
pub mod normalize;
pub mod packet;
pub mod reconnect;
pub mod record;
pub mod roi;
pub mod selector;
pub mod source;

pub use adaptive::{AdaptiveRateController, LagBasedRateController};
pub use fingerprint::fingerprint_bgr;
pub use frozen::{FrozenReason, FrozenStreamDetector};
pub use identity::FrameIdentity;
pub use normalize::Normalizer;
pub use packet::FramePacket;
pub use reconnect::ReconnectController;
pub use record::RecordingBuffer;
pub use roi::RoiMask;
pub use selector::{Selector, SharedSelector};
pub use source::{RawFileSource, SourceError, TestPatternSource, VideoSource, open_source};
