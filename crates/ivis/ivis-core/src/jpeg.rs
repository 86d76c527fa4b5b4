use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

use crate::frame::BgrFrame;

#[derive(Debug, Error)]
#[error("jpeg encode failed: {0}")]
pub struct JpegError(#[from] image::ImageError);

/// Encodes a BGR frame as JPEG at the given quality (1..=100).
///
/// The encoder wants RGB, so the channel order is swapped into a scratch
/// buffer first.
pub fn encode_jpeg(frame: &BgrFrame, quality: u8) -> Result<Vec<u8>, JpegError> {
    let bgr = frame.as_bytes();
    let mut rgb = vec![0u8; bgr.len()];
    for (dst, src) in rgb.chunks_exact_mut(3).zip(bgr.chunks_exact(3)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
    }

    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    encoder.encode(
        &rgb,
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_a_valid_jpeg() {
        let frame = BgrFrame::filled(16, 16, 0x42);
        let jpeg = encode_jpeg(&frame, 85).unwrap();
        // SOI marker
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(jpeg.len() > 4);
    }
}
