//! The tracker seam and a lightweight IoU tracker.
//!
//! ReID trackers integrate behind [`Tracker`]: they receive the raw
//! detections and the pixels (for appearance embedding) and return the
//! full track set. The pipeline then keeps confirmed tracks that were
//! updated at most one frame ago and matches them back onto detections.
//!
//! [`IouTracker`] is the built-in baseline: pure bbox-overlap association,
//! no appearance model, no `appearance_hash`.

use ivis_core::BgrFrame;

use crate::detector::RawDetection;
use crate::matching::iou;

/// Tracker output for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub track_id: i64,
    pub bbox_xyxy: [f64; 4],
    pub confidence: f64,
    pub class_id: i64,
    /// Digest of the appearance embedding, when the tracker has one.
    pub appearance_hash: Option<String>,
    /// A track becomes confirmed after enough consecutive hits.
    pub confirmed: bool,
    /// Frames since this track last matched a detection.
    pub time_since_update: u32,
}

pub trait Tracker: Send {
    fn update(&mut self, detections: &[RawDetection], frame: &BgrFrame) -> Vec<Track>;
}

struct TrackState {
    track_id: i64,
    bbox_xyxy: [f64; 4],
    confidence: f64,
    class_id: i64,
    hits: u32,
    time_since_update: u32,
}

/// Greedy IoU association tracker.
pub struct IouTracker {
    states: Vec<TrackState>,
    next_id: i64,
    max_age: u32,
    init_frames: u32,
    iou_threshold: f64,
}

impl IouTracker {
    pub fn new(max_age: u32, init_frames: u32, iou_threshold: f64) -> Self {
        Self {
            states: Vec::new(),
            next_id: 1,
            max_age,
            init_frames: init_frames.max(1),
            iou_threshold,
        }
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[RawDetection], _frame: &BgrFrame) -> Vec<Track> {
        // Candidate (overlap, state index, detection index), best first.
        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for (si, state) in self.states.iter().enumerate() {
            for (di, det) in detections.iter().enumerate() {
                let overlap = iou(&state.bbox_xyxy, &det.bbox_xyxy);
                if overlap >= self.iou_threshold {
                    candidates.push((overlap, si, di));
                }
            }
        }
        candidates.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
                .then(a.2.cmp(&b.2))
        });

        let mut state_matched = vec![false; self.states.len()];
        let mut det_matched = vec![false; detections.len()];
        for (_, si, di) in candidates {
            if state_matched[si] || det_matched[di] {
                continue;
            }
            state_matched[si] = true;
            det_matched[di] = true;
            let state = &mut self.states[si];
            let det = &detections[di];
            state.bbox_xyxy = det.bbox_xyxy;
            state.confidence = det.conf;
            state.class_id = det.class_id;
            state.hits += 1;
            state.time_since_update = 0;
        }

        for (si, matched) in state_matched.iter().enumerate() {
            if !matched {
                self.states[si].time_since_update += 1;
            }
        }
        let max_age = self.max_age;
        self.states.retain(|s| s.time_since_update <= max_age);

        for (di, det) in detections.iter().enumerate() {
            if !det_matched[di] {
                self.states.push(TrackState {
                    track_id: self.next_id,
                    bbox_xyxy: det.bbox_xyxy,
                    confidence: det.conf,
                    class_id: det.class_id,
                    hits: 1,
                    time_since_update: 0,
                });
                self.next_id += 1;
            }
        }

        self.states
            .iter()
            .map(|s| Track {
                track_id: s.track_id,
                bbox_xyxy: s.bbox_xyxy,
                confidence: s.confidence,
                class_id: s.class_id,
                appearance_hash: None,
                confirmed: s.hits >= self.init_frames,
                time_since_update: s.time_since_update,
            })
            .collect()
    }
}
