use rand::Rng;
use std::time::Duration;

use crate::config::EngineSettings;

/// Bounded exponential backoff with jitter, reset whenever the engine
/// makes progress.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration, jitter: f64) -> Self {
        Self {
            initial,
            factor: factor.max(1.0),
            max,
            jitter: jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_initial_ms),
            settings.backoff_factor,
            Duration::from_millis(settings.backoff_max_ms),
            settings.backoff_jitter,
        )
    }

    /// Delay before the next retry. Grows geometrically until the
    /// bound, give or take the jitter fraction.
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(63);
        self.attempt = self.attempt.saturating_add(1);
        let raw = self.initial.as_secs_f64() * self.factor.powi(exponent as i32);
        let capped = raw.min(self.max.as_secs_f64());
        let spread = capped * self.jitter;
        let jittered = if spread > 0.0 {
            let offset = rand::rng().random_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
