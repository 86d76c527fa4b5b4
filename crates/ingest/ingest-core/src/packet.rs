/// One raw packet off a capture source, before normalization.
#[derive(Debug, Clone)]
pub struct FramePacket {
    /// Raw pixel payload in the source's color order.
    pub payload: Vec<u8>,
    /// Presentation timestamp in milliseconds; non-positive values are
    /// dropped by the pipeline.
    pub pts_ms: f64,
    /// Wall-clock capture time (Unix ms).
    pub wall_ms: i64,
    /// Process-monotonic capture time (ms).
    pub mono_ms: i64,
}
