//! Exponential reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

#[derive(Debug)]
pub struct ReconnectController {
    min_delay: f64,
    max_delay: f64,
    factor: f64,
    jitter: f64,
    max_retries: u32,
    attempts: u32,
}

impl ReconnectController {
    /// `max_retries` of zero means unbounded retries.
    pub fn new(min_delay: f64, max_delay: f64, factor: f64, jitter: f64, max_retries: u32) -> Self {
        let min_delay = min_delay.max(0.0);
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
            factor: factor.max(1.0),
            jitter: jitter.max(0.0),
            max_retries,
            attempts: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The next backoff delay, or `None` when retries are exhausted.
    ///
    /// `delay_k = min(max, min * factor^k)` perturbed by a uniform
    /// `+-jitter * delay_k`.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_retries > 0 && self.attempts >= self.max_retries {
            return None;
        }
        let mut delay = (self.min_delay * self.factor.powi(self.attempts as i32))
            .min(self.max_delay);
        self.attempts += 1;
        if self.jitter > 0.0 {
            let perturbation: f64 = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
            delay += perturbation * delay;
        }
        Some(Duration::from_secs_f64(delay.max(0.0)))
    }
}
