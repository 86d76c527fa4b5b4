//! Perceptual frame fingerprint.
//!
//! A 64-bit average hash: the frame is reduced to an 8x8 luminance
//! thumbnail by nearest-neighbor sampling, each cell compares against the
//! thumbnail mean, and the bits pack MSB-first into 8 bytes rendered as 16
//! hex characters. The sampling and the integer luminance weights are fixed
//! so identical BGR input always yields the identical hex string, across
//! processes and platforms.

use ivis_core::BgrFrame;

const GRID: u32 = 8;

/// BT.601 integer luma from a BGR triple.
#[inline]
fn luma(bgr: [u8; 3]) -> u32 {
    (114 * bgr[0] as u32 + 587 * bgr[1] as u32 + 299 * bgr[2] as u32) / 1000
}

/// 16-hex-char average hash of the frame.
pub fn fingerprint_bgr(frame: &BgrFrame) -> String {
    let width = frame.width();
    let height = frame.height();

    let mut cells = [0u32; (GRID * GRID) as usize];
    for gy in 0..GRID {
        let sy = gy * height / GRID;
        for gx in 0..GRID {
            let sx = gx * width / GRID;
            cells[(gy * GRID + gx) as usize] = luma(frame.pixel(sx, sy));
        }
    }

    let total: u32 = cells.iter().sum();
    let mean = total / (GRID * GRID);

    let mut packed = [0u8; 8];
    for (i, &cell) in cells.iter().enumerate() {
        if cell > mean {
            packed[i / 8] |= 0x80 >> (i % 8);
        }
    }

    let mut hex = String::with_capacity(16);
    for byte in packed {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}
