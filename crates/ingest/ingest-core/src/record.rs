//! Rolling JPEG record buffer.
//!
//! A bounded deque of `(timestamp_ms, jpeg_bytes)` capped by both a time
//! window and a frame count; the oldest entry is evicted when either bound
//! is hit, and evictions by the frame cap are counted as record drops.
//! Encode failures are sideband: reported to the caller, never escalated.

use std::collections::VecDeque;

use ivis_core::{BgrFrame, encode_jpeg};
use tracing::debug;

pub struct RecordingBuffer {
    frames: VecDeque<(i64, Vec<u8>)>,
    max_seconds: f64,
    max_frames: usize,
    jpeg_quality: u8,
    drops: u64,
}

impl RecordingBuffer {
    pub fn new(max_seconds: f64, max_frames: u32, jpeg_quality: u8) -> Self {
        Self {
            frames: VecDeque::new(),
            max_seconds: max_seconds.max(0.0),
            max_frames: max_frames.max(1) as usize,
            jpeg_quality: jpeg_quality.clamp(1, 100),
            drops: 0,
        }
    }

    /// Encodes and stages one frame; false when the JPEG encode failed.
    pub fn add_frame(&mut self, frame: &BgrFrame, timestamp_ms: i64) -> bool {
        let jpeg = match encode_jpeg(frame, self.jpeg_quality) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(%err, "record buffer encode failed");
                return false;
            }
        };
        if self.frames.len() == self.max_frames {
            self.frames.pop_front();
            self.drops += 1;
        }
        self.frames.push_back((timestamp_ms, jpeg));
        self.prune_by_time(timestamp_ms);
        true
    }

    fn prune_by_time(&mut self, now_ms: i64) {
        if self.max_seconds <= 0.0 {
            return;
        }
        let cutoff = now_ms - (self.max_seconds * 1000.0) as i64;
        while self
            .frames
            .front()
            .is_some_and(|(ts, _)| *ts < cutoff)
        {
            self.frames.pop_front();
        }
    }

    /// JPEG payloads whose timestamps fall within `[start_ms, end_ms]`.
    pub fn clip(&self, start_ms: i64, end_ms: i64) -> Vec<Vec<u8>> {
        self.frames
            .iter()
            .filter(|(ts, _)| (start_ms..=end_ms).contains(ts))
            .map(|(_, jpeg)| jpeg.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> BgrFrame {
        BgrFrame::filled(16, 16, 0x55)
    }

    #[test]
    fn frame_cap_evicts_oldest_and_counts_drops() {
        let mut buf = RecordingBuffer::new(0.0, 3, 80);
        for ts in 0..5 {
            assert!(buf.add_frame(&tiny(), ts));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.drops(), 2);
        // survivors are the newest three
        assert_eq!(buf.clip(0, 10).len(), 3);
        assert!(buf.clip(0, 1).is_empty());
    }

    #[test]
    fn time_window_prunes_old_entries() {
        let mut buf = RecordingBuffer::new(1.0, 100, 80);
        buf.add_frame(&tiny(), 0);
        buf.add_frame(&tiny(), 500);
        buf.add_frame(&tiny(), 1_600);
        // ts 0 fell out of the 1 s window ending at 1600
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.drops(), 0);
    }

    #[test]
    fn clip_selects_inclusive_range() {
        let mut buf = RecordingBuffer::new(0.0, 10, 80);
        for ts in [100, 200, 300, 400] {
            buf.add_frame(&tiny(), ts);
        }
        assert_eq!(buf.clip(200, 300).len(), 2);
        assert_eq!(buf.clip(401, 500).len(), 0);
    }
}
