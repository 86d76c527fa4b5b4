//! Frozen-stream detection.
//!
//! A live source can keep delivering packets while its content has stalled:
//! the fingerprint repeats, the PTS stops advancing, the embedded wall
//! clock stops, or packets stop arriving entirely. Any of the four
//! conditions reaching its configured threshold reports a reason, which
//! sends the producer into reconnect.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrozenReason {
    NoFrames,
    RepeatHash,
    PtsStuck,
    TimestampStuck,
}

impl FrozenReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FrozenReason::NoFrames => "no_frames",
            FrozenReason::RepeatHash => "repeat_hash",
            FrozenReason::PtsStuck => "pts_stuck",
            FrozenReason::TimestampStuck => "timestamp_stuck",
        }
    }
}

#[derive(Debug)]
pub struct FrozenStreamDetector {
    no_frame_timeout_ms: f64,
    repeat_hash_count: u32,
    pts_stuck_count: u32,
    timestamp_stuck_count: u32,

    last_frame_mono: Option<i64>,
    last_hash: Option<String>,
    repeat_hash_runs: u32,
    last_pts: Option<f64>,
    pts_stuck_runs: u32,
    last_timestamp_ms: Option<i64>,
    timestamp_stuck_runs: u32,
}

impl FrozenStreamDetector {
    /// Thresholds of zero disable the corresponding check.
    pub fn new(
        no_frame_timeout_sec: f64,
        repeat_hash_count: u32,
        pts_stuck_count: u32,
        timestamp_stuck_count: u32,
    ) -> Self {
        Self {
            no_frame_timeout_ms: no_frame_timeout_sec.max(0.0) * 1000.0,
            repeat_hash_count,
            pts_stuck_count,
            timestamp_stuck_count,
            last_frame_mono: None,
            last_hash: None,
            repeat_hash_runs: 0,
            last_pts: None,
            pts_stuck_runs: 0,
            last_timestamp_ms: None,
            timestamp_stuck_runs: 0,
        }
    }

    /// Clears all runs, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.last_frame_mono = None;
        self.last_hash = None;
        self.repeat_hash_runs = 0;
        self.last_pts = None;
        self.pts_stuck_runs = 0;
        self.last_timestamp_ms = None;
        self.timestamp_stuck_runs = 0;
    }

    /// Records one delivered frame's observables.
    pub fn note_frame(
        &mut self,
        pts_ms: Option<f64>,
        timestamp_ms: Option<i64>,
        fingerprint: Option<&str>,
        mono_ms: i64,
    ) {
        self.last_frame_mono = Some(mono_ms);

        if let Some(fp) = fingerprint {
            if self.last_hash.as_deref() == Some(fp) {
                self.repeat_hash_runs += 1;
            } else {
                self.repeat_hash_runs = 0;
                self.last_hash = Some(fp.to_string());
            }
        }

        if let Some(pts) = pts_ms {
            if self.last_pts.is_some_and(|last| pts <= last) {
                self.pts_stuck_runs += 1;
            } else {
                self.pts_stuck_runs = 0;
                self.last_pts = Some(pts);
            }
        }

        if let Some(ts) = timestamp_ms {
            if self.last_timestamp_ms.is_some_and(|last| ts <= last) {
                self.timestamp_stuck_runs += 1;
            } else {
                self.timestamp_stuck_runs = 0;
                self.last_timestamp_ms = Some(ts);
            }
        }
    }

    /// The reason the stream counts as frozen right now, if any.
    pub fn check(&self, now_mono_ms: i64) -> Option<FrozenReason> {
        if self.no_frame_timeout_ms > 0.0
            && let Some(last) = self.last_frame_mono
            && (now_mono_ms - last) as f64 > self.no_frame_timeout_ms
        {
            return Some(FrozenReason::NoFrames);
        }
        if self.repeat_hash_count > 0 && self.repeat_hash_runs >= self.repeat_hash_count {
            return Some(FrozenReason::RepeatHash);
        }
        if self.pts_stuck_count > 0 && self.pts_stuck_runs >= self.pts_stuck_count {
            return Some(FrozenReason::PtsStuck);
        }
        if self.timestamp_stuck_count > 0 && self.timestamp_stuck_runs >= self.timestamp_stuck_count
        {
            return Some(FrozenReason::TimestampStuck);
        }
        None
    }
}
