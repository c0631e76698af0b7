use std::time::{Duration, Instant};

use hmdlink_settings::{Setting, SettingsProvider};
use tracing::trace;

use crate::error::{Result, TrackingError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleConfig {
    /// Minimum spacing between sent values.
    pub min_interval: Duration,
    /// A value is sent only if `max(new/last, last/new)` exceeds this.
    pub change_ratio: f32,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
            change_ratio: 1.1,
        }
    }
}

impl ThrottleConfig {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        let interval_ms = settings.number(Setting::MinSendIntervalMs)?;
        if !(interval_ms.is_finite() && interval_ms >= 0.0) {
            return Err(TrackingError::InvalidThreshold {
                name: "min_send_interval_ms",
                value: interval_ms as f32,
            });
        }
        let config = Self {
            min_interval: Duration::from_millis(interval_ms as u64),
            change_ratio: settings.number(Setting::ChangeRatio)? as f32,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.change_ratio.is_finite() && self.change_ratio >= 1.0) {
            return Err(TrackingError::InvalidConfig(format!(
                "change ratio must be at least 1, got {}",
                self.change_ratio
            )));
        }
        Ok(())
    }
}

/// Rate limiter for outgoing gaze distances.
///
/// The first valid value always passes. After that a value passes only when
/// the minimum interval has elapsed since the last sent value and it differs
/// from that value by more than the change ratio in either direction.
/// Non-finite and non-positive values never pass.
#[derive(Debug)]
pub struct DistanceThrottle {
    config: ThrottleConfig,
    last_sent: Option<(f32, Instant)>,
    suppressed: u64,
}

impl DistanceThrottle {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            last_sent: None,
            suppressed: 0,
        }
    }

    pub fn config(&self) -> ThrottleConfig {
        self.config
    }

    pub fn set_config(&mut self, config: ThrottleConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Decide whether `value` goes out; records it as sent if so.
    pub fn should_send(&mut self, value: f32, now: Instant) -> bool {
        let send = self.evaluate(value, now);
        if send {
            self.last_sent = Some((value, now));
        } else {
            self.suppressed += 1;
            trace!(value, suppressed = self.suppressed, "gaze distance suppressed");
        }
        send
    }

    pub fn last_sent(&self) -> Option<f32> {
        self.last_sent.map(|(value, _)| value)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    /// Forget the last sent value so the next valid one passes.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }

    fn evaluate(&self, value: f32, now: Instant) -> bool {
        if !value.is_finite() || value <= 0.0 {
            return false;
        }
        let Some((last, at)) = self.last_sent else {
            return true;
        };
        if now.saturating_duration_since(at) < self.config.min_interval {
            return false;
        }
        let ratio = (value / last).max(last / value);
        ratio > self.config.change_ratio
    }
}
