//! Shared fixtures for the criterion benches.

use detect_core::{RawDetection, Track};
use ivis_contracts::Detection;

/// VGA BGR frame filled with a marker byte.
pub fn vga_payload(value: u8) -> Vec<u8> {
    vec![value; 640 * 480 * 3]
}

/// A grid of detections spread over a VGA frame.
pub fn detection_grid(count: usize) -> Vec<Detection> {
    (0..count)
        .map(|i| {
            let x = (i % 8) as f64 * 70.0;
            let y = (i / 8) as f64 * 50.0;
            Detection {
                bbox: [x, y, x + 60.0, y + 40.0],
                conf: 0.9,
                class_id: (i % 3) as i64,
                class_name: None,
                track_id: None,
            }
        })
        .collect()
}

/// Confirmed tracks slightly offset from [`detection_grid`].
pub fn track_grid(count: usize) -> Vec<Track> {
    (0..count)
        .map(|i| {
            let x = (i % 8) as f64 * 70.0 + 2.0;
            let y = (i / 8) as f64 * 50.0 + 1.0;
            Track {
                track_id: i as i64 + 1,
                bbox_xyxy: [x, y, x + 60.0, y + 40.0],
                confidence: 0.9,
                class_id: (i % 3) as i64,
                appearance_hash: None,
                confirmed: true,
                time_since_update: 0,
            }
        })
        .collect()
}

/// Raw variants of [`detection_grid`], for tracker benches.
pub fn raw_detection_grid(count: usize) -> Vec<RawDetection> {
    detection_grid(count)
        .into_iter()
        .map(|d| RawDetection {
            bbox_xyxy: d.bbox,
            conf: d.conf,
            class_id: d.class_id,
        })
        .collect()
}
