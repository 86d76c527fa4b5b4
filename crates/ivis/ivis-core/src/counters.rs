use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::warn;

/// In-process counters keyed by a stable reason string.
///
/// Every per-frame drop and sideband failure increments one of these; the
/// engines log a snapshot periodically. Reason strings come from the
/// contract validators or from the fixed set (`stale`, `shm_miss`, `lag`,
/// `bad_json`, ...).
#[derive(Default)]
pub struct Counters {
    map: Mutex<HashMap<String, u64>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, reason: &str) {
        self.add(reason, 1);
    }

    pub fn add(&self, reason: &str, n: u64) {
        let mut map = self.map.lock();
        *map.entry(reason.to_string()).or_insert(0) += n;
    }

    pub fn get(&self, reason: &str) -> u64 {
        self.map.lock().get(reason).copied().unwrap_or(0)
    }

    /// Sorted `(reason, count)` snapshot for logging.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut items: Vec<_> = self
            .map
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        items.sort();
        items
    }
}

/// Emits a warning once per key; repeats are counted silently elsewhere.
#[derive(Default)]
pub struct WarnOnce {
    seen: Mutex<HashSet<String>>,
}

impl WarnOnce {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&self, key: &str, message: &str) {
        if self.seen.lock().insert(key.to_string()) {
            warn!(key, "{message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_reason() {
        let c = Counters::new();
        c.inc("stale");
        c.inc("stale");
        c.inc("shm_miss");
        assert_eq!(c.get("stale"), 2);
        assert_eq!(c.get("shm_miss"), 1);
        assert_eq!(c.get("missing"), 0);
        let snap = c.snapshot();
        assert_eq!(snap, vec![("shm_miss".into(), 1), ("stale".into(), 2)]);
    }
}
