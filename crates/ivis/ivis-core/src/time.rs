use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Milliseconds on a process-local monotonic clock.
///
/// The epoch is the first call in this process; values are only comparable
/// within one process, which is all the pipelines need (frozen-stream
/// detection, selector pacing, stale windows).
pub fn monotonic_ms() -> i64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as i64
}

/// Age of `timestamp_ms` relative to `now_ms`.
#[inline]
pub fn latency_ms(now_ms: i64, timestamp_ms: i64) -> i64 {
    now_ms - timestamp_ms
}
