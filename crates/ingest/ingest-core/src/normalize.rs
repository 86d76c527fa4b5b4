//! Geometry and color normalization.
//!
//! Every frame leaving ingestion is BGR8 at the configured size. Resizing
//! is nearest-neighbor; RGB sources get their channel order swapped.

use ivis_core::{BgrFrame, FrameShapeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceColor {
    Bgr,
    Rgb,
}

pub struct Normalizer {
    width: u32,
    height: u32,
    source_color: SourceColor,
}

impl Normalizer {
    pub fn new(width: u32, height: u32, source_color: SourceColor) -> Self {
        Self {
            width,
            height,
            source_color,
        }
    }

    /// Produces the canonical BGR8 frame from a raw payload of
    /// `src_width * src_height * 3` bytes in the source color order.
    pub fn process(
        &self,
        payload: Vec<u8>,
        src_width: u32,
        src_height: u32,
    ) -> Result<BgrFrame, FrameShapeError> {
        let mut frame = BgrFrame::from_vec(payload, src_width, src_height)?;

        if self.source_color == SourceColor::Rgb {
            for px in frame.as_bytes_mut().chunks_exact_mut(3) {
                px.swap(0, 2);
            }
        }

        if src_width == self.width && src_height == self.height {
            return Ok(frame);
        }
        Ok(self.resize_nearest(&frame))
    }

    fn resize_nearest(&self, src: &BgrFrame) -> BgrFrame {
        let mut dst = BgrFrame::filled(self.width, self.height, 0);
        for y in 0..self.height {
            let sy = y * src.height() / self.height;
            for x in 0..self.width {
                let sx = x * src.width() / self.width;
                dst.put_pixel(x as i64, y as i64, src.pixel(sx, sy));
            }
        }
        dst
    }
}
