//! Auto-restart backoff after a receive-stream failure.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Delay before the first automatic restart.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on any single restart delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Growth factor applied per consecutive failed restart.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Maximum additive jitter, as a fraction of the computed delay.
pub const DEFAULT_JITTER: f64 = 0.1;

/// When and how often the session manager restarts a dropped session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Delay before the first restart.
    pub initial_delay: Duration,
    /// Growth factor per consecutive attempt. `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Cap on a single delay, before jitter.
    pub max_delay: Duration,
    /// Extra random delay in `[0, jitter * delay]`. Never shortens a delay.
    pub jitter: f64,
    /// Give up after this many consecutive attempts. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Whether restarts happen at all.
    pub enabled: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            max_attempts: None,
            enabled: true,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay, no jitter, unbounded attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
            jitter: 0.0,
            max_attempts: None,
            enabled: true,
        }
    }

    /// Never restart automatically.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based), without jitter.
    ///
    /// Returns `None` when the policy forbids that attempt.
    pub fn base_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt == 0 {
            return None;
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let factor = multiplier.powi(exponent);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Some(Duration::try_from_secs_f64(secs).unwrap_or(self.max_delay))
    }

    /// Delay before attempt number `attempt` (1-based), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        let base = self.base_delay(attempt)?;
        // NaN survives `clamp`, so reject non-finite values first.
        if !self.jitter.is_finite() || self.jitter <= 0.0 {
            return Some(base);
        }
        let jitter = self.jitter.min(1.0);
        let extra = rand::thread_rng().gen_range(0.0..=jitter);
        Some(base.mul_f64(1.0 + extra))
    }
}
