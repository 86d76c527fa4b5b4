//! Region-of-interest masking.
//!
//! Operators describe regions as strings: rectangles `"x1,y1,x2,y2;..."`
//! and polygons `"x,y;x,y;...|..."`. The regions are rasterized once into a
//! binary mask which is AND-ed over every frame, so pixels outside every
//! region never leave the producer. Malformed regions are skipped and
//! reported in the parse result rather than failing the pipeline.

use ivis_core::BgrFrame;

pub type Box2i = (i64, i64, i64, i64);
pub type Polygon = Vec<(i64, i64)>;

fn parse_ints(parts: &str) -> Vec<i64> {
    parts
        .split(',')
        .filter_map(|raw| {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return None;
            }
            trimmed.parse::<f64>().ok().map(|v| v as i64)
        })
        .collect()
}

/// Parses `"x1,y1,x2,y2;..."`, returning the valid boxes and the number of
/// skipped malformed regions.
pub fn parse_boxes(raw: &str) -> (Vec<Box2i>, usize) {
    let mut boxes = Vec::new();
    let mut skipped = 0;
    for part in raw.split(';') {
        if part.trim().is_empty() {
            continue;
        }
        let nums = parse_ints(part);
        if nums.len() != 4 {
            skipped += 1;
            continue;
        }
        let (x1, y1, x2, y2) = (nums[0], nums[1], nums[2], nums[3]);
        if x2 <= x1 || y2 <= y1 {
            skipped += 1;
            continue;
        }
        boxes.push((x1, y1, x2, y2));
    }
    (boxes, skipped)
}

/// Parses `"x,y;x,y;...|..."`, returning valid polygons (3+ points) and the
/// number skipped.
pub fn parse_polygons(raw: &str) -> (Vec<Polygon>, usize) {
    let mut polygons = Vec::new();
    let mut skipped = 0;
    for poly_raw in raw.split('|') {
        if poly_raw.trim().is_empty() {
            continue;
        }
        let points: Polygon = poly_raw
            .split(';')
            .filter_map(|point_raw| {
                let nums = parse_ints(point_raw);
                (nums.len() == 2).then(|| (nums[0], nums[1]))
            })
            .collect();
        if points.len() >= 3 {
            polygons.push(points);
        } else {
            skipped += 1;
        }
    }
    (polygons, skipped)
}

/// Binary mask rasterized once per configuration.
pub struct RoiMask {
    mask: Vec<u8>,
    width: u32,
    height: u32,
}

impl RoiMask {
    /// Rasterizes boxes and polygons; `None` when no region is configured.
    pub fn build(width: u32, height: u32, boxes: &[Box2i], polygons: &[Polygon]) -> Option<Self> {
        if boxes.is_empty() && polygons.is_empty() {
            return None;
        }
        let mut mask = vec![0u8; width as usize * height as usize];

        for &(x1, y1, x2, y2) in boxes {
            let x1 = x1.clamp(0, width as i64) as usize;
            let y1 = y1.clamp(0, height as i64) as usize;
            let x2 = x2.clamp(0, width as i64) as usize;
            let y2 = y2.clamp(0, height as i64) as usize;
            for row in mask.chunks_exact_mut(width as usize).take(y2).skip(y1) {
                row[x1..x2].fill(255);
            }
        }

        for polygon in polygons {
            fill_polygon(&mut mask, width, height, polygon);
        }

        Some(Self {
            mask,
            width,
            height,
        })
    }

    /// Zeroes every pixel outside the mask.
    pub fn apply(&self, frame: &mut BgrFrame) {
        debug_assert_eq!(frame.width(), self.width);
        debug_assert_eq!(frame.height(), self.height);
        for (px, &keep) in frame
            .as_bytes_mut()
            .chunks_exact_mut(3)
            .zip(self.mask.iter())
        {
            if keep == 0 {
                px.fill(0);
            }
        }
    }

    /// Number of pixels the mask lets through.
    pub fn coverage(&self) -> usize {
        self.mask.iter().filter(|&&v| v != 0).count()
    }
}

/// Even-odd scanline fill against the pixel-center line `y + 0.5`.
fn fill_polygon(mask: &mut [u8], width: u32, height: u32, polygon: &[(i64, i64)]) {
    for y in 0..height as i64 {
        let scan = y as f64 + 0.5;
        let mut crossings: Vec<f64> = Vec::new();
        for i in 0..polygon.len() {
            let (x1, y1) = polygon[i];
            let (x2, y2) = polygon[(i + 1) % polygon.len()];
            let (fy1, fy2) = (y1 as f64, y2 as f64);
            if (fy1 <= scan && fy2 > scan) || (fy2 <= scan && fy1 > scan) {
                let t = (scan - fy1) / (fy2 - fy1);
                crossings.push(x1 as f64 + t * (x2 - x1) as f64);
            }
        }
        crossings.sort_by(|a, b| a.partial_cmp(b).unwrap());
        for pair in crossings.chunks_exact(2) {
            let start = pair[0].ceil().max(0.0) as usize;
            let end = (pair[1].ceil().max(0.0) as usize).min(width as usize);
            if start < end {
                let row = y as usize * width as usize;
                mask[row + start..row + end].fill(255);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxes_parse_and_skip_malformed() {
        let (boxes, skipped) = parse_boxes("0,0,4,4;10,10,5,5;1,2,3;2,2,6,6");
        assert_eq!(boxes, vec![(0, 0, 4, 4), (2, 2, 6, 6)]);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn polygons_parse_and_skip_malformed() {
        let (polys, skipped) = parse_polygons("0,0;8,0;8,8;0,8|1,1;2,2");
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].len(), 4);
        assert_eq!(skipped, 1);
    }

    #[test]
    fn float_coordinates_truncate() {
        let (boxes, skipped) = parse_boxes("0.9,0.2,4.7,4.9");
        assert_eq!(boxes, vec![(0, 0, 4, 4)]);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn no_regions_means_no_mask() {
        assert!(RoiMask::build(8, 8, &[], &[]).is_none());
    }

    #[test]
    fn box_mask_keeps_inside_and_zeroes_outside() {
        let mask = RoiMask::build(8, 8, &[(2, 2, 6, 6)], &[]).unwrap();
        assert_eq!(mask.coverage(), 16);

        let mut frame = BgrFrame::filled(8, 8, 9);
        mask.apply(&mut frame);
        assert_eq!(frame.pixel(3, 3), [9, 9, 9]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
        assert_eq!(frame.pixel(6, 6), [0, 0, 0]);
    }

    #[test]
    fn rectangle_polygon_fills_its_interior() {
        let polygon = vec![(0, 0), (8, 0), (8, 8), (0, 8)];
        let mask = RoiMask::build(8, 8, &[], &[polygon]).unwrap();
        assert_eq!(mask.coverage(), 64);
    }

    #[test]
    fn triangle_polygon_fills_roughly_half() {
        let polygon = vec![(0, 0), (16, 0), (0, 16)];
        let mask = RoiMask::build(16, 16, &[], &[polygon]).unwrap();
        let coverage = mask.coverage();
        assert!(
            (96..=160).contains(&coverage),
            "triangle coverage {coverage}"
        );
    }
}
