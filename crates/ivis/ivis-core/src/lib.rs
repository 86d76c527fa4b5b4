//! Shared runtime utilities for the ivis pipelines: clocks, the stop flag,
//! per-reason drop counters, the raw frame type and JPEG encoding.

mod counters;
mod frame;
mod jpeg;
mod runtime;
mod time;

pub use counters::{Counters, WarnOnce};
pub use frame::{BgrFrame, FrameShapeError};
pub use jpeg::{JpegError, encode_jpeg};
pub use runtime::Runtime;
pub use time::{latency_ms, monotonic_ms, wall_clock_ms};
