//! Blind frame decoding.
//!
//! The consumer knows the frame geometry from its own configuration, not
//! from the wire: the contract references raw bytes and this decoder turns
//! them into a typed frame, rejecting size mismatches (which indicate a
//! config split-brain between producer and consumer).

use ivis_core::{BgrFrame, FrameShapeError};

pub struct FrameDecoder {
    width: u32,
    height: u32,
}

impl FrameDecoder {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn decode(&self, bytes: Vec<u8>) -> Result<BgrFrame, FrameShapeError> {
        BgrFrame::from_vec(bytes, self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_exact_size() {
        let decoder = FrameDecoder::new(4, 2);
        let frame = decoder.decode(vec![1u8; 24]).unwrap();
        assert_eq!(frame.width(), 4);
        assert_eq!(frame.height(), 2);
    }

    #[test]
    fn rejects_size_mismatch() {
        let decoder = FrameDecoder::new(4, 2);
        let err = decoder.decode(vec![1u8; 23]).unwrap_err();
        assert_eq!(err.expected, 24);
    }
}
