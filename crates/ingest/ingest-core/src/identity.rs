/// Content-addressed identity of one captured frame.
///
/// The id hashes `(stream_id, pts, fingerprint)`, so the same content at
/// the same position in the same stream always names the same frame, which
/// is what lets results be correlated without any ordering assumptions.
#[derive(Debug, Clone)]
pub struct FrameIdentity {
    pub stream_id: String,
    pub pts_ms: f64,
    pub fingerprint: String,
    pub frame_id: String,
}

impl FrameIdentity {
    pub fn new(stream_id: &str, pts_ms: f64, fingerprint: &str) -> Self {
        let raw_key = format!("{stream_id}_{pts_ms:.6}_{fingerprint}");
        let frame_id = format!("{:x}", md5::compute(raw_key.as_bytes()));
        Self {
            stream_id: stream_id.to_string(),
            pts_ms,
            fingerprint: fingerprint.to_string(),
            frame_id,
        }
    }
}
