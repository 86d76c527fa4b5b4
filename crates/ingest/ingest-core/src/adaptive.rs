//! Adaptive capture-rate feedback.
//!
//! Two controllers steer the selector. [`AdaptiveRateController`] follows
//! the consumer's inference latency: an EMA of `inference_ms` sets the
//! sustainable rate with a safety margin, smoothed and hysteresis-gated so
//! the target does not thrash. [`LagBasedRateController`] watches an
//! externally reported queue length and clamps the rate to the floor while
//! the broker is behind, releasing the cap with hysteresis.

use ivis_core::monotonic_ms;

use crate::selector::SharedSelector;

pub struct AdaptiveRateController {
    selector: SharedSelector,
    min_fps: f64,
    max_fps: f64,
    safety: f64,
    ema_alpha: f64,
    hysteresis_ratio: f64,
    min_update_interval_s: f64,
    fps_smoothing: f64,

    ema_ms: Option<f64>,
    last_target_fps: Option<f64>,
    last_update_s: f64,
}

impl AdaptiveRateController {
    pub fn new(selector: SharedSelector, min_fps: f64, max_fps: f64, safety: f64) -> Self {
        Self::with_params(selector, min_fps, max_fps, safety, 0.2, 0.1, 0.5, 0.3)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_params(
        selector: SharedSelector,
        min_fps: f64,
        max_fps: f64,
        safety: f64,
        ema_alpha: f64,
        hysteresis_ratio: f64,
        min_update_interval_s: f64,
        fps_smoothing: f64,
    ) -> Self {
        let min_fps = min_fps.max(1.0);
        Self {
            selector,
            min_fps,
            max_fps: max_fps.max(min_fps),
            safety: safety.max(1.0),
            ema_alpha: ema_alpha.clamp(0.01, 1.0),
            hysteresis_ratio: hysteresis_ratio.clamp(0.0, 0.5),
            min_update_interval_s: min_update_interval_s.max(0.0),
            fps_smoothing: fps_smoothing.clamp(0.0, 1.0),
            ema_ms: None,
            last_target_fps: None,
            last_update_s: 0.0,
        }
    }

    /// Feeds one observed inference latency.
    pub fn observe_inference(&mut self, inference_ms: f64) {
        self.observe_at(inference_ms, monotonic_ms() as f64 / 1000.0);
    }

    /// Clock-injected variant used by tests.
    pub fn observe_at(&mut self, inference_ms: f64, now_s: f64) {
        if inference_ms <= 0.0 {
            return;
        }
        let ema = match self.ema_ms {
            None => inference_ms,
            Some(prev) => self.ema_alpha * inference_ms + (1.0 - self.ema_alpha) * prev,
        };
        self.ema_ms = Some(ema);

        let mut target = (1000.0 / (ema * self.safety)).clamp(self.min_fps, self.max_fps);

        if let Some(last) = self.last_target_fps {
            target = last + (target - last) * self.fps_smoothing;
            let delta = (target - last).abs();
            if delta / last.max(1e-6) < self.hysteresis_ratio {
                return;
            }
            if now_s - self.last_update_s < self.min_update_interval_s {
                return;
            }
        }

        self.selector.lock().set_target_fps(target);
        self.last_target_fps = Some(target);
        self.last_update_s = now_s;
    }
}

pub struct LagBasedRateController {
    selector: SharedSelector,
    min_fps: f64,
    lag_threshold: u64,
    hysteresis_ratio: f64,
    lagged: bool,
}

impl LagBasedRateController {
    /// A threshold of zero disables the controller.
    pub fn new(
        selector: SharedSelector,
        min_fps: f64,
        lag_threshold: u64,
        hysteresis_ratio: f64,
    ) -> Self {
        Self {
            selector,
            min_fps: min_fps.max(1.0),
            lag_threshold,
            hysteresis_ratio: hysteresis_ratio.clamp(0.0, 0.9),
            lagged: false,
        }
    }

    /// Feeds one lag observation; returns true when the cap state changed.
    pub fn update(&mut self, lag: u64) -> bool {
        if self.lag_threshold == 0 {
            return false;
        }

        if self.lagged {
            let recover_at = (self.lag_threshold as f64 * (1.0 - self.hysteresis_ratio)) as u64;
            if lag <= recover_at {
                self.selector.lock().set_lag_cap(None);
                self.lagged = false;
                return true;
            }
            self.selector.lock().set_lag_cap(Some(self.min_fps));
            return false;
        }

        if lag >= self.lag_threshold {
            self.selector.lock().set_lag_cap(Some(self.min_fps));
            self.lagged = true;
            return true;
        }
        false
    }

    pub fn is_lagged(&self) -> bool {
        self.lagged
    }
}
