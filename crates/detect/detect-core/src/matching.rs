//! Global one-to-one detection-to-track matching.
//!
//! Candidates are every (detection, track) pair with IoU at or above the
//! threshold. They are walked best-overlap first with a deterministic tie
//! break (ascending track id, then detection index), committing greedily:
//! once a track or a detection is taken, later candidates for it lose.
//! Unmatched detections simply carry no `track_id`.

use std::cmp::Ordering;
use std::collections::HashSet;

use ivis_contracts::Detection;

use crate::tracker::Track;

/// Minimum overlap for a detection to claim a track id.
pub const IOU_MATCH_THRESHOLD: f64 = 0.3;

/// Axis-aligned intersection over union; zero when either box has
/// non-positive area.
pub fn iou(a: &[f64; 4], b: &[f64; 4]) -> f64 {
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    if area_a <= 0.0 || area_b <= 0.0 {
        return 0.0;
    }
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

/// Assigns `track_id`s onto `detections` from the given live tracks.
pub fn assign_track_ids(detections: &mut [Detection], tracks: &[Track]) {
    let mut candidates: Vec<(f64, i64, usize)> = Vec::new();
    for (det_idx, det) in detections.iter().enumerate() {
        for track in tracks {
            let overlap = iou(&det.bbox, &track.bbox_xyxy);
            if overlap >= IOU_MATCH_THRESHOLD {
                candidates.push((overlap, track.track_id, det_idx));
            }
        }
    }

    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut taken_tracks: HashSet<i64> = HashSet::new();
    let mut taken_dets = vec![false; detections.len()];
    for (_, track_id, det_idx) in candidates {
        if taken_tracks.contains(&track_id) || taken_dets[det_idx] {
            continue;
        }
        taken_tracks.insert(track_id);
        taken_dets[det_idx] = true;
        detections[det_idx].track_id = Some(track_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(bbox: [f64; 4]) -> Detection {
        Detection {
            bbox,
            conf: 0.9,
            class_id: 1,
            class_name: None,
            track_id: None,
        }
    }

    fn track(id: i64, bbox: [f64; 4]) -> Track {
        Track {
            track_id: id,
            bbox_xyxy: bbox,
            confidence: 0.9,
            class_id: 1,
            appearance_hash: None,
            confirmed: true,
            time_since_update: 0,
        }
    }

    #[test]
    fn iou_basics() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &a), 1.0);
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        // degenerate boxes have zero iou
        assert_eq!(iou(&a, &[5.0, 5.0, 5.0, 15.0]), 0.0);
        assert_eq!(iou(&[3.0, 3.0, 1.0, 1.0], &a), 0.0);

        let half = iou(&a, &[0.0, 0.0, 10.0, 5.0]);
        assert!((half - 0.5).abs() < 1e-9);
    }

    #[test]
    fn best_overlap_wins_the_ambiguous_pair() {
        // D1 is the exact track box; D0 overlaps at ~0.68.
        let mut dets = vec![det([10.0, 10.0, 20.0, 20.0]), det([11.0, 11.0, 21.0, 21.0])];
        let tracks = vec![track(5, [11.0, 11.0, 21.0, 21.0])];

        assign_track_ids(&mut dets, &tracks);
        assert_eq!(dets[0].track_id, None);
        assert_eq!(dets[1].track_id, Some(5));
    }

    #[test]
    fn float_jitter_still_associates() {
        let mut dets = vec![det([10.0, 20.0, 50.0, 60.0])];
        let tracks = vec![track(42, [10.15, 19.85, 50.05, 60.1])];
        assign_track_ids(&mut dets, &tracks);
        assert_eq!(dets[0].track_id, Some(42));
    }

    #[test]
    fn no_track_id_appears_twice() {
        let mut dets = vec![det([0.0, 0.0, 10.0, 10.0]), det([1.0, 1.0, 9.0, 9.0])];
        let tracks = vec![track(7, [0.0, 0.0, 10.0, 10.0])];
        assign_track_ids(&mut dets, &tracks);
        let assigned: Vec<_> = dets.iter().filter_map(|d| d.track_id).collect();
        assert_eq!(assigned, vec![7]);
    }

    #[test]
    fn below_threshold_pairs_never_match() {
        let mut dets = vec![det([0.0, 0.0, 10.0, 10.0])];
        let tracks = vec![track(1, [8.0, 8.0, 18.0, 18.0])];
        // overlap 4/196 << 0.3
        assign_track_ids(&mut dets, &tracks);
        assert_eq!(dets[0].track_id, None);
    }

    #[test]
    fn equal_overlap_ties_break_by_track_id_then_det_index() {
        // Two identical tracks on two identical detections: track 1 takes
        // detection 0, track 2 takes detection 1.
        let bbox = [0.0, 0.0, 10.0, 10.0];
        let mut dets = vec![det(bbox), det(bbox)];
        let tracks = vec![track(2, bbox), track(1, bbox)];
        assign_track_ids(&mut dets, &tracks);
        assert_eq!(dets[0].track_id, Some(1));
        assert_eq!(dets[1].track_id, Some(2));
    }
}
