//! Annotation rendering.
//!
//! Draws detection boxes, track-id labels and an info strip (FPS,
//! inference latency) onto a writable copy of the frame. Colors are BGR
//! triples.

use ivis_contracts::ResultContractV1;
use ivis_core::BgrFrame;

use crate::font::{GLYPH_H, GLYPH_W, glyph};

const DETECTION_COLOR: [u8; 3] = [0, 200, 255];
const TRACK_COLOR: [u8; 3] = [0, 255, 0];
const INFO_COLOR: [u8; 3] = [0, 255, 255];

const BOX_THICKNESS: i64 = 2;
const LINE_SPACING: i64 = 11;

/// Draws a rectangle outline.
pub fn draw_rect(frame: &mut BgrFrame, bbox: [f64; 4], color: [u8; 3], thickness: i64) {
    let [x1, y1, x2, y2] = bbox.map(|v| v.round() as i64);
    for t in 0..thickness {
        for x in x1..=x2 {
            frame.put_pixel(x, y1 + t, color);
            frame.put_pixel(x, y2 - t, color);
        }
        for y in y1..=y2 {
            frame.put_pixel(x1 + t, y, color);
            frame.put_pixel(x2 - t, y, color);
        }
    }
}

/// Renders `text` with the embedded 5x7 font, top-left at `(x, y)`.
pub fn draw_text(frame: &mut BgrFrame, x: i64, y: i64, text: &str, color: [u8; 3]) {
    let mut pen_x = x;
    for c in text.chars() {
        let rows = glyph(c);
        for (gy, row) in rows.iter().enumerate() {
            for gx in 0..GLYPH_W {
                if row & (0x10 >> gx) != 0 {
                    frame.put_pixel(pen_x + gx as i64, y + gy as i64, color);
                }
            }
        }
        pen_x += GLYPH_W as i64 + 1;
    }
}

/// Draws boxes, track ids and the info strip for one frame.
///
/// A `None` result renders only the info strip, which is what the viewer
/// shows when no data is flowing.
pub fn render_overlay(frame: &mut BgrFrame, result: Option<&ResultContractV1>, fps: f64) {
    let detections = result.map(|r| r.detections.as_slice()).unwrap_or(&[]);
    let tracked = detections.iter().filter(|d| d.track_id.is_some()).count();

    let mut lines = vec![
        format!("FPS: {fps:.1}"),
        format!("DET: {} | TRK: {tracked}", detections.len()),
    ];
    if let Some(r) = result {
        lines.push(format!("INF: {:.1} MS", r.timing.inference_ms));
    }
    let mut y = 6;
    for line in &lines {
        draw_text(frame, 6, y, line, INFO_COLOR);
        y += LINE_SPACING;
    }

    for det in detections {
        draw_rect(frame, det.bbox, DETECTION_COLOR, BOX_THICKNESS);
        let label = match &det.class_name {
            Some(name) => format!("{name} {:.2}", det.conf),
            None => format!("C{} {:.2}", det.class_id, det.conf),
        };
        let label_y = (det.bbox[1].round() as i64 - GLYPH_H as i64 - 2).max(0);
        draw_text(frame, det.bbox[0].round() as i64, label_y, &label, DETECTION_COLOR);

        if let Some(track_id) = det.track_id {
            draw_rect(frame, det.bbox, TRACK_COLOR, 1);
            let tag_y = (det.bbox[3].round() as i64 + 3).min(frame.height() as i64 - 1);
            draw_text(
                frame,
                det.bbox[0].round() as i64,
                tag_y,
                &format!("ID {track_id}"),
                TRACK_COLOR,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivis_contracts::{Detection, ModelInfo, Timing};

    fn result_with(detections: Vec<Detection>) -> ResultContractV1 {
        ResultContractV1 {
            contract_version: 1,
            frame_id: "f".into(),
            stream_id: "s".into(),
            camera_id: "c".into(),
            timestamp_ms: 0,
            mono_ms: 0,
            detections,
            model: ModelInfo {
                name: "null".into(),
                version: "0".into(),
                threshold: None,
                input_size: None,
            },
            timing: Timing {
                inference_ms: 4.0,
                model_ms: None,
                track_ms: None,
            },
        }
    }

    #[test]
    fn rect_touches_its_corners() {
        let mut frame = BgrFrame::filled(64, 64, 0);
        draw_rect(&mut frame, [10.0, 10.0, 20.0, 20.0], [1, 2, 3], 1);
        assert_eq!(frame.pixel(10, 10), [1, 2, 3]);
        assert_eq!(frame.pixel(20, 20), [1, 2, 3]);
        assert_eq!(frame.pixel(15, 15), [0, 0, 0]);
    }

    #[test]
    fn out_of_bounds_boxes_do_not_panic() {
        let mut frame = BgrFrame::filled(32, 32, 0);
        draw_rect(&mut frame, [-10.0, -10.0, 100.0, 100.0], [9, 9, 9], 2);
        draw_text(&mut frame, 30, 30, "OVERFLOWING", [9, 9, 9]);
    }

    #[test]
    fn overlay_marks_pixels_for_detections() {
        let mut frame = BgrFrame::filled(64, 64, 0);
        let result = result_with(vec![Detection {
            bbox: [30.0, 30.0, 50.0, 50.0],
            conf: 0.9,
            class_id: 1,
            class_name: None,
            track_id: Some(3),
        }]);
        render_overlay(&mut frame, Some(&result), 12.5);
        // Track color wins on the innermost outline.
        assert_eq!(frame.pixel(40, 30), TRACK_COLOR);
        // Info strip drew something near the top-left.
        let strip_ink = (0..64u32).any(|x| frame.pixel(x, 8) != [0, 0, 0]);
        assert!(strip_ink);
    }

    #[test]
    fn empty_result_still_renders_info_strip() {
        let mut frame = BgrFrame::filled(64, 64, 0);
        render_overlay(&mut frame, None, 0.0);
        let ink = (0..64u32)
            .flat_map(|x| (0..16u32).map(move |y| (x, y)))
            .any(|(x, y)| frame.pixel(x, y) != [0, 0, 0]);
        assert!(ink);
    }
}
