//! Capture sources.
//!
//! The pipeline talks to a [`VideoSource`] trait object and never to a
//! concrete device. Two sources ship here: a raw BGR frame file (fixed
//! geometry, identity decode) and a synthetic moving test pattern. Camera
//! and RTSP clients implement the same trait out of tree.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use ivis_core::{monotonic_ms, wall_clock_ms};

use crate::packet::FramePacket;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open source '{uri}'")]
    Open {
        uri: String,
        #[source]
        source: io::Error,
    },

    #[error("unsupported source uri '{uri}'")]
    Unsupported { uri: String },

    #[error("source i/o failed")]
    Io(#[from] io::Error),
}

pub trait VideoSource: Send {
    /// The next raw packet, or `None` on end-of-stream / no data yet.
    fn next_packet(&mut self) -> Result<Option<FramePacket>, SourceError>;

    /// Tears down and re-establishes the source. False when the attempt
    /// failed (the reconnect controller decides what happens next).
    fn reconnect(&mut self) -> bool;

    /// Seeks file sources back to the start; no-op for live sources.
    fn rewind(&mut self);

    /// File sources end; live sources stall.
    fn is_file(&self) -> bool;

    /// Source pixel geometry.
    fn frame_size(&self) -> (u32, u32);
}

/// Opens a source by URI: a `.bgr`/`.raw` path of packed frames, or
/// `pattern://<name>` for the synthetic generator.
pub fn open_source(
    uri: &str,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<Box<dyn VideoSource>, SourceError> {
    if let Some(rest) = uri.strip_prefix("pattern://") {
        info!(pattern = rest, "opening synthetic source");
        return Ok(Box::new(TestPatternSource::new(width, height, fps)));
    }
    if uri.ends_with(".bgr") || uri.ends_with(".raw") {
        return Ok(Box::new(RawFileSource::open(uri, width, height, fps)?));
    }
    Err(SourceError::Unsupported {
        uri: uri.to_string(),
    })
}

/// Packed raw BGR8 frames read straight off disk; decode is the identity.
pub struct RawFileSource {
    path: PathBuf,
    file: File,
    width: u32,
    height: u32,
    frame_bytes: usize,
    frame_interval_ms: f64,
    next_pts_ms: f64,
}

impl RawFileSource {
    pub fn open(path: &str, width: u32, height: u32, fps: f64) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|source| SourceError::Open {
            uri: path.to_string(),
            source,
        })?;
        let frame_interval_ms = 1000.0 / fps.max(1.0);
        Ok(Self {
            path: PathBuf::from(path),
            file,
            width,
            height,
            frame_bytes: width as usize * height as usize * 3,
            frame_interval_ms,
            next_pts_ms: frame_interval_ms,
        })
    }
}

impl VideoSource for RawFileSource {
    fn next_packet(&mut self) -> Result<Option<FramePacket>, SourceError> {
        let mut payload = vec![0u8; self.frame_bytes];
        let mut filled = 0;
        while filled < payload.len() {
            match self.file.read(&mut payload[filled..]) {
                Ok(0) => return Ok(None),
                Ok(n) => filled += n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        let pts_ms = self.next_pts_ms;
        self.next_pts_ms += self.frame_interval_ms;
        Ok(Some(FramePacket {
            payload,
            pts_ms,
            wall_ms: wall_clock_ms(),
            mono_ms: monotonic_ms(),
        }))
    }

    fn reconnect(&mut self) -> bool {
        match File::open(&self.path) {
            Ok(file) => {
                self.file = file;
                self.next_pts_ms = self.frame_interval_ms;
                true
            }
            Err(_) => false,
        }
    }

    fn rewind(&mut self) {
        let _ = self.file.seek(SeekFrom::Start(0));
        self.next_pts_ms = self.frame_interval_ms;
    }

    fn is_file(&self) -> bool {
        true
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Synthetic moving gradient, handy for wiring checks without a camera.
/// Paces itself to the requested rate the way a live device would.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval_ms: f64,
    tick: u64,
    last_emit: Option<std::time::Instant>,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            frame_interval_ms: 1000.0 / fps.max(1.0),
            tick: 0,
            last_emit: None,
        }
    }
}

impl VideoSource for TestPatternSource {
    fn next_packet(&mut self) -> Result<Option<FramePacket>, SourceError> {
        if let Some(last) = self.last_emit {
            let interval = std::time::Duration::from_secs_f64(self.frame_interval_ms / 1000.0);
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_emit = Some(std::time::Instant::now());
        self.tick += 1;
        let shift = self.tick as u32;
        let mut payload = vec![0u8; self.width as usize * self.height as usize * 3];
        for y in 0..self.height {
            for x in 0..self.width {
                let off = (y as usize * self.width as usize + x as usize) * 3;
                payload[off] = ((x + shift) % 256) as u8;
                payload[off + 1] = ((y + shift) % 256) as u8;
                payload[off + 2] = (shift % 256) as u8;
            }
        }
        Ok(Some(FramePacket {
            payload,
            pts_ms: self.tick as f64 * self.frame_interval_ms,
            wall_ms: wall_clock_ms(),
            mono_ms: monotonic_ms(),
        }))
    }

    fn reconnect(&mut self) -> bool {
        true
    }

    fn rewind(&mut self) {}

    fn is_file(&self) -> bool {
        false
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_raw(frames: u32, width: u32, height: u32) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("ivis_source_test_{ts}.bgr"));
        let mut file = File::create(&path).unwrap();
        for i in 0..frames {
            let frame = vec![i as u8; width as usize * height as usize * 3];
            file.write_all(&frame).unwrap();
        }
        path
    }

    #[test]
    fn raw_file_source_yields_frames_then_eof() {
        let path = temp_raw(3, 4, 2);
        let mut src = RawFileSource::open(path.to_str().unwrap(), 4, 2, 10.0).unwrap();
        for i in 0..3u8 {
            let packet = src.next_packet().unwrap().unwrap();
            assert_eq!(packet.payload, vec![i; 24]);
            assert!(packet.pts_ms > 0.0);
        }
        assert!(src.next_packet().unwrap().is_none());

        src.rewind();
        let packet = src.next_packet().unwrap().unwrap();
        assert_eq!(packet.payload, vec![0u8; 24]);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn raw_file_pts_advances_by_frame_interval() {
        let path = temp_raw(2, 2, 2);
        let mut src = RawFileSource::open(path.to_str().unwrap(), 2, 2, 20.0).unwrap();
        let a = src.next_packet().unwrap().unwrap();
        let b = src.next_packet().unwrap().unwrap();
        assert!((b.pts_ms - a.pts_ms - 50.0).abs() < 1e-9);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn pattern_source_moves() {
        let mut src = TestPatternSource::new(8, 8, 10.0);
        let a = src.next_packet().unwrap().unwrap();
        let b = src.next_packet().unwrap().unwrap();
        assert_ne!(a.payload, b.payload);
        assert!(!src.is_file());
    }

    #[test]
    fn open_source_dispatches_by_uri() {
        assert!(open_source("pattern://gradient", 8, 8, 5.0).is_ok());
        let err = open_source("rtsp://camera/stream", 8, 8, 5.0).err().unwrap();
        assert!(matches!(err, SourceError::Unsupported { .. }));
    }
}
