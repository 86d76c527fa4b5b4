//! Frame rate selection.
//!
//! Two modes: `clock` paces emission against the monotonic clock, `pts`
//! against the source's presentation timestamps. The effective rate is the
//! base target capped by an optional lag cap and clamped to at least 1 fps.

use std::sync::Arc;

use parking_lot::Mutex;

use ivis_core::monotonic_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Clock,
    Pts,
}

#[derive(Debug)]
pub struct Selector {
    base_target_fps: f64,
    lag_cap_fps: Option<f64>,
    target_fps: f64,
    frame_duration_ms: f64,
    last_pts: f64,
    last_emit_ms: f64,
    mode: Mode,
}

/// The selector is shared between the capture loop and the adaptive
/// feedback thread.
pub type SharedSelector = Arc<Mutex<Selector>>;

impl Selector {
    pub fn new(target_fps: f64, mode: Mode) -> Self {
        let fps = target_fps.max(1.0);
        Self {
            base_target_fps: fps,
            lag_cap_fps: None,
            target_fps: fps,
            frame_duration_ms: 1000.0 / fps,
            last_pts: -1.0,
            last_emit_ms: -1.0,
            mode,
        }
    }

    pub fn shared(target_fps: f64, mode: Mode) -> SharedSelector {
        Arc::new(Mutex::new(Self::new(target_fps, mode)))
    }

    /// Whether the frame at `pts_ms` should pass, advancing internal state
    /// when it does.
    pub fn allow(&mut self, pts_ms: f64) -> bool {
        self.allow_at(pts_ms, monotonic_ms() as f64)
    }

    /// Clock-injected variant of [`allow`] used by the pacing tests.
    ///
    /// [`allow`]: Selector::allow
    pub fn allow_at(&mut self, pts_ms: f64, now_mono_ms: f64) -> bool {
        if self.mode == Mode::Pts && pts_ms > 0.0 {
            if self.last_pts < 0.0 {
                self.last_pts = pts_ms;
                return true;
            }
            if pts_ms <= self.last_pts {
                return false;
            }
            if pts_ms - self.last_pts >= self.frame_duration_ms {
                self.last_pts = pts_ms;
                return true;
            }
            return false;
        }

        if self.last_emit_ms < 0.0 {
            self.last_emit_ms = now_mono_ms;
            return true;
        }
        if now_mono_ms - self.last_emit_ms >= self.frame_duration_ms {
            self.last_emit_ms = now_mono_ms;
            if pts_ms > 0.0 {
                self.last_pts = pts_ms;
            }
            return true;
        }
        false
    }

    pub fn set_target_fps(&mut self, fps: f64) {
        if fps <= 0.0 {
            return;
        }
        self.base_target_fps = fps;
        self.apply_effective_fps();
    }

    /// Caps the effective rate during broker lag; `None` releases the cap.
    pub fn set_lag_cap(&mut self, fps: Option<f64>) {
        self.lag_cap_fps = fps.map(|f| f.max(1.0));
        self.apply_effective_fps();
    }

    pub fn target_fps(&self) -> f64 {
        self.target_fps
    }

    fn apply_effective_fps(&mut self) {
        let mut effective = self.base_target_fps;
        if let Some(cap) = self.lag_cap_fps {
            effective = effective.min(cap);
        }
        effective = effective.max(1.0);
        self.target_fps = effective;
        self.frame_duration_ms = 1000.0 / effective;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_mode_allows_target_fps_per_second() {
        let mut sel = Selector::new(10.0, Mode::Clock);
        // Simulated 30 fps capture over one second of monotonic time.
        let mut allowed = 0;
        for tick in 0..30 {
            let now = tick as f64 * (1000.0 / 30.0);
            if sel.allow_at(tick as f64, now) {
                allowed += 1;
            }
        }
        assert!((9..=11).contains(&allowed), "allowed {allowed} frames");
    }

    #[test]
    fn pts_mode_spaces_by_pts_and_rejects_regressions() {
        let mut sel = Selector::new(5.0, Mode::Pts);
        assert!(sel.allow_at(100.0, 0.0));
        // 200 ms spacing needed at 5 fps
        assert!(!sel.allow_at(150.0, 0.0));
        assert!(!sel.allow_at(100.0, 0.0));
        assert!(!sel.allow_at(50.0, 0.0));
        assert!(sel.allow_at(300.0, 0.0));
    }

    #[test]
    fn lag_cap_bounds_effective_rate() {
        let mut sel = Selector::new(20.0, Mode::Clock);
        sel.set_lag_cap(Some(2.0));
        assert_eq!(sel.target_fps(), 2.0);
        sel.set_target_fps(30.0);
        assert_eq!(sel.target_fps(), 2.0);
        sel.set_lag_cap(None);
        assert_eq!(sel.target_fps(), 30.0);
        // never below 1 fps
        sel.set_lag_cap(Some(0.1));
        assert_eq!(sel.target_fps(), 1.0);
    }

    #[test]
    fn first_frame_always_passes() {
        let mut clock = Selector::new(1.0, Mode::Clock);
        assert!(clock.allow_at(5.0, 0.0));
        let mut pts = Selector::new(1.0, Mode::Pts);
        assert!(pts.allow_at(5.0, 0.0));
    }
}
