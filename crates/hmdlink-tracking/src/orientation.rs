use ahrs::{Ahrs, Madgwick};
use glam::{EulerRot, Quat, Vec3};
use hmdlink_settings::{Setting, SettingsProvider};
use nalgebra::{UnitQuaternion, Vector3};
use tracing::trace;

use crate::error::{Result, TrackingError};
use crate::imu::ImuSample;

/// Vectors shorter than this are treated as zero before normalization.
const MIN_NORM: f32 = 1e-6;

/// Adaptive gain parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterGains {
    /// Gain while the gyro magnitude exceeds `moving_threshold`.
    pub beta_moving: f32,
    /// Gain otherwise.
    pub beta_still: f32,
    /// rad/s
    pub moving_threshold: f32,
    /// Gyro magnitudes below this (rad/s) are treated as zero.
    pub min_gyro_threshold: f32,
}

impl Default for FilterGains {
    fn default() -> Self {
        Self {
            beta_moving: 0.033,
            beta_still: 0.1,
            moving_threshold: 0.2,
            min_gyro_threshold: 0.005,
        }
    }
}

impl FilterGains {
    pub fn validate(&self) -> Result<()> {
        check_gain("beta_moving", self.beta_moving)?;
        check_gain("beta_still", self.beta_still)?;
        check_threshold("moving_threshold", self.moving_threshold)?;
        check_threshold("min_gyro_threshold", self.min_gyro_threshold)?;
        Ok(())
    }
}

fn check_gain(name: &'static str, value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TrackingError::InvalidGain { name, value })
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(TrackingError::InvalidThreshold { name, value })
    }
}

/// Filter construction parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterConfig {
    pub gains: FilterGains,
    /// Integration step in seconds.
    pub sample_period: f32,
    /// Fuse the magnetometer when a sample carries one.
    pub use_magnetometer: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            gains: FilterGains::default(),
            sample_period: 0.002,
            use_magnetometer: true,
        }
    }
}

impl FilterConfig {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        let config = Self {
            gains: FilterGains {
                beta_moving: settings.number(Setting::BetaMoving)? as f32,
                beta_still: settings.number(Setting::BetaStill)? as f32,
                moving_threshold: settings.number(Setting::MovingThreshold)? as f32,
                min_gyro_threshold: settings.number(Setting::MinGyroThreshold)? as f32,
            },
            sample_period: settings.number(Setting::SamplePeriod)? as f32,
            use_magnetometer: settings.flag(Setting::UseMagnetometer)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.gains.validate()?;
        if !(self.sample_period.is_finite() && self.sample_period > 0.0) {
            return Err(TrackingError::InvalidSamplePeriod(self.sample_period));
        }
        Ok(())
    }
}

/// Update counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Updates that integrated the gyro.
    pub updates: u64,
    /// Updates skipped because the gyro carried no information.
    pub skipped: u64,
    /// Updates that fused the magnetometer.
    pub nine_axis: u64,
}

/// Madgwick attitude estimator with a gain that adapts to head motion.
///
/// The gradient step itself is `ahrs::Madgwick`; this wrapper picks the gain
/// per update, drops gyro readings too small to carry information, falls
/// back from 9 to 6 to gyro-only axes as inputs vanish, and keeps the last
/// good attitude if an update ever degenerates.
#[derive(Debug, Clone)]
pub struct OrientationFilter {
    madgwick: Madgwick<f64>,
    gains: FilterGains,
    beta: f32,
    sample_period: f32,
    use_magnetometer: bool,
    stats: FilterStats,
}

impl OrientationFilter {
    pub fn new(config: FilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            madgwick: Madgwick::new(
                f64::from(config.sample_period),
                f64::from(config.gains.beta_still),
            ),
            gains: config.gains,
            beta: config.gains.beta_still,
            sample_period: config.sample_period,
            use_magnetometer: config.use_magnetometer,
            stats: FilterStats::default(),
        })
    }

    /// Update from a parsed sample, fusing the magnetometer when enabled.
    pub fn update(&mut self, sample: &ImuSample) {
        if self.use_magnetometer {
            self.update_9dof(sample.gyro, sample.accel, sample.mag);
        } else {
            self.update_6dof(sample.gyro, sample.accel);
        }
    }

    /// Gyro plus gravity correction. A zero accelerometer integrates the gyro alone.
    pub fn update_6dof(&mut self, gyro: Vec3, accel: Vec3) {
        if !self.select_gain(gyro) {
            return;
        }
        let previous = self.madgwick.quat;
        let g = vector(gyro);

        let fused = normalized(accel)
            .map(|a| self.madgwick.update_imu(&g, &vector(a)).is_ok())
            .unwrap_or(false);
        if !fused {
            self.madgwick.update_gyro(&g);
        }
        self.settle(previous);
    }

    /// Gyro plus gravity and magnetic field correction.
    ///
    /// Falls back to [`OrientationFilter::update_6dof`] when the magnetometer
    /// or accelerometer reads zero.
    pub fn update_9dof(&mut self, gyro: Vec3, accel: Vec3, mag: Vec3) {
        let (Some(a), Some(m)) = (normalized(accel), normalized(mag)) else {
            self.update_6dof(gyro, accel);
            return;
        };
        if !self.select_gain(gyro) {
            return;
        }
        let previous = self.madgwick.quat;
        let g = vector(gyro);

        match self.madgwick.update(&g, &vector(a), &vector(m)) {
            Ok(_) => self.stats.nine_axis += 1,
            Err(err) => {
                trace!(?err, "nine-axis step rejected; gyro only");
                self.madgwick.update_gyro(&g);
            }
        }
        self.settle(previous);
    }

    /// Snap back to identity without integrating.
    pub fn reset(&mut self) {
        *self.madgwick.quat_mut() = UnitQuaternion::identity();
    }

    pub fn quaternion(&self) -> Quat {
        let c = &self.madgwick.quat.coords;
        Quat::from_xyzw(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32)
    }

    /// (yaw, pitch, roll) in degrees, Y-up.
    pub fn euler_degrees(&self) -> (f32, f32, f32) {
        let (yaw, pitch, roll) = self.quaternion().to_euler(EulerRot::YXZ);
        (yaw.to_degrees(), pitch.to_degrees(), roll.to_degrees())
    }

    /// Gain chosen by the most recent update.
    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn gains(&self) -> FilterGains {
        self.gains
    }

    pub fn sample_period(&self) -> f32 {
        self.sample_period
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Replace all gains. Rejected gains leave the filter unchanged.
    pub fn set_gains(&mut self, gains: FilterGains) -> Result<()> {
        gains.validate()?;
        self.gains = gains;
        Ok(())
    }

    pub fn set_beta_moving(&mut self, value: f32) -> Result<()> {
        self.set_gains(FilterGains {
            beta_moving: value,
            ..self.gains
        })
    }

    pub fn set_beta_still(&mut self, value: f32) -> Result<()> {
        self.set_gains(FilterGains {
            beta_still: value,
            ..self.gains
        })
    }

    pub fn set_moving_threshold(&mut self, value: f32) -> Result<()> {
        self.set_gains(FilterGains {
            moving_threshold: value,
            ..self.gains
        })
    }

    pub fn set_min_gyro_threshold(&mut self, value: f32) -> Result<()> {
        self.set_gains(FilterGains {
            min_gyro_threshold: value,
            ..self.gains
        })
    }

    pub fn set_sample_period(&mut self, seconds: f32) -> Result<()> {
        if !(seconds.is_finite() && seconds > 0.0) {
            return Err(TrackingError::InvalidSamplePeriod(seconds));
        }
        self.sample_period = seconds;
        *self.madgwick.sample_period_mut() = f64::from(seconds);
        Ok(())
    }

    pub fn set_use_magnetometer(&mut self, enabled: bool) {
        self.use_magnetometer = enabled;
    }

    /// Choose and install the gain for this update; `false` when the gyro is
    /// (effectively) zero and the update should be skipped.
    fn select_gain(&mut self, gyro: Vec3) -> bool {
        let magnitude = gyro.length();
        if gyro == Vec3::ZERO || magnitude < self.gains.min_gyro_threshold {
            self.stats.skipped += 1;
            return false;
        }
        self.beta = if magnitude > self.gains.moving_threshold {
            self.gains.beta_moving
        } else {
            self.gains.beta_still
        };
        *self.madgwick.beta_mut() = f64::from(self.beta);
        true
    }

    /// Count the update, or restore `previous` if it produced a non-finite attitude.
    fn settle(&mut self, previous: UnitQuaternion<f64>) {
        if self.madgwick.quat.coords.iter().all(|c| c.is_finite()) {
            self.stats.updates += 1;
        } else {
            *self.madgwick.quat_mut() = previous;
        }
    }
}

fn vector(v: Vec3) -> Vector3<f64> {
    Vector3::new(f64::from(v.x), f64::from(v.y), f64::from(v.z))
}

fn normalized(v: Vec3) -> Option<Vec3> {
    let length = v.length();
    if length.is_finite() && length >= MIN_NORM {
        Some(v / length)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn filter() -> OrientationFilter {
        OrientationFilter::new(FilterConfig::default()).unwrap()
    }

    fn norm(q: Quat) -> f32 {
        q.length()
    }

    #[test]
    fn zero_inputs_never_move_the_quaternion() {
        let mut f = filter();
        for _ in 0..1000 {
            f.update_6dof(Vec3::ZERO, Vec3::ZERO);
            f.update_9dof(Vec3::ZERO, Vec3::ZERO, Vec3::ZERO);
        }
        assert_eq!(f.quaternion(), Quat::IDENTITY);
        assert_eq!(f.stats().updates, 0);
        assert_eq!(f.stats().skipped, 2000);
    }

    #[test]
    fn gyro_below_minimum_is_ignored() {
        let mut f = filter();
        f.update_6dof(Vec3::new(0.001, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(f.quaternion(), Quat::IDENTITY);
    }

    #[test]
    fn single_gyro_step_matches_derivative() {
        let mut f = filter();
        let gx = 1.0f32;
        f.update_6dof(Vec3::new(gx, 0.0, 0.0), Vec3::ZERO);

        let dt = FilterConfig::default().sample_period;
        let raw = [1.0, 0.5 * gx * dt, 0.0, 0.0];
        let n = (raw[0] * raw[0] + raw[1] * raw[1]).sqrt();
        let expected = Quat::from_xyzw(raw[1] / n, 0.0, 0.0, raw[0] / n);

        assert!(f.quaternion().abs_diff_eq(expected, 1e-7));
    }

    #[test]
    fn norm_stays_unit_over_random_samples() {
        let mut f = filter();
        let mut rng = StdRng::seed_from_u64(42);
        let mut v = |rng: &mut StdRng, scale: f32| {
            Vec3::new(
                rng.gen_range(-scale..scale),
                rng.gen_range(-scale..scale),
                rng.gen_range(-scale..scale),
            )
        };

        for i in 0..10_000 {
            let gyro = v(&mut rng, 5.0);
            let accel = v(&mut rng, 20.0);
            if i % 2 == 0 {
                f.update_6dof(gyro, accel);
            } else {
                let mag = v(&mut rng, 1.0);
                f.update_9dof(gyro, accel, mag);
            }
            assert!((norm(f.quaternion()) - 1.0).abs() < 1e-5, "step {i}");
        }
    }

    #[test]
    fn gain_follows_gyro_magnitude() {
        let mut f = filter();
        f.update_6dof(Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(f.beta(), f.gains().beta_moving);
        f.update_6dof(Vec3::new(0.05, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(f.beta(), f.gains().beta_still);
    }

    /// Correction size = difference between an update with and without accel.
    fn correction(gains: FilterGains, gyro: Vec3) -> f32 {
        let config = FilterConfig {
            gains,
            ..FilterConfig::default()
        };
        let tilted = Vec3::new(0.0, 0.6, 0.8);
        let mut with_accel = OrientationFilter::new(config).unwrap();
        let mut without = with_accel.clone();
        with_accel.update_6dof(gyro, tilted);
        without.update_6dof(gyro, Vec3::ZERO);
        (with_accel.quaternion() - without.quaternion()).length()
    }

    #[test]
    fn moving_gain_corrects_less_than_still_gain() {
        let gyro = Vec3::new(0.0, 0.0, 0.5);
        let base = FilterGains::default();
        let moving = correction(
            FilterGains {
                moving_threshold: 0.1,
                ..base
            },
            gyro,
        );
        let still = correction(
            FilterGains {
                moving_threshold: 10.0,
                ..base
            },
            gyro,
        );

        assert!(moving < still);
        let ratio = moving / still;
        let expected = base.beta_moving / base.beta_still;
        assert!((ratio - expected).abs() < 0.05 * expected, "ratio {ratio}");
    }

    #[test]
    fn step_matches_plain_madgwick_with_selected_gain() {
        let mut f = filter();
        let gyro = Vec3::new(0.05, -0.02, 0.01);
        let accel = Vec3::new(0.3, 0.1, 9.6);
        f.update_6dof(gyro, accel);

        let config = FilterConfig::default();
        let mut plain = Madgwick::new(
            f64::from(config.sample_period),
            f64::from(config.gains.beta_still),
        );
        let c = plain.update_imu(&vector(gyro), &vector(accel)).unwrap().coords;
        let expected = Quat::from_xyzw(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32);
        assert!(f.quaternion().abs_diff_eq(expected, 1e-6));
    }

    #[test]
    fn tilt_converges_to_measured_gravity() {
        let mut f = filter();
        let down = Vec3::new(0.0, 0.5, 0.75f32.sqrt());
        // Slow spin about the gravity axis keeps every update above the gyro floor.
        let gyro = down * 0.006;
        for _ in 0..10_000 {
            f.update_6dof(gyro, down * 9.81);
        }
        let predicted = f.quaternion().conjugate() * Vec3::Z;
        assert!(predicted.abs_diff_eq(down, 1e-2), "predicted {predicted}");
        assert_eq!(f.beta(), f.gains().beta_still);
    }

    #[test]
    fn nine_axis_without_mag_matches_six_axis() {
        let mut a = filter();
        let mut b = filter();
        let gyro = Vec3::new(0.3, -0.2, 0.1);
        let accel = Vec3::new(0.1, 0.2, 9.7);
        a.update_6dof(gyro, accel);
        b.update_9dof(gyro, accel, Vec3::ZERO);
        assert_eq!(a.quaternion(), b.quaternion());
        assert_eq!(b.stats().nine_axis, 0);
    }

    #[test]
    fn invalid_gains_rejected() {
        let config = FilterConfig {
            gains: FilterGains {
                beta_still: 1.5,
                ..FilterGains::default()
            },
            ..FilterConfig::default()
        };
        assert!(matches!(
            OrientationFilter::new(config),
            Err(TrackingError::InvalidGain {
                name: "beta_still",
                ..
            })
        ));

        let mut f = filter();
        assert!(f.set_beta_moving(-0.1).is_err());
        assert!(matches!(
            f.set_min_gyro_threshold(-1.0),
            Err(TrackingError::InvalidThreshold { .. })
        ));
        assert!(f.set_sample_period(0.0).is_err());
        assert_eq!(f.gains(), FilterGains::default());
        assert!(f.set_beta_moving(1.0).is_ok());
    }

    #[test]
    fn reset_returns_to_identity() {
        let mut f = filter();
        for _ in 0..100 {
            f.update_6dof(Vec3::new(1.0, 2.0, 0.5), Vec3::ZERO);
        }
        assert_ne!(f.quaternion(), Quat::IDENTITY);
        f.reset();
        assert_eq!(f.quaternion(), Quat::IDENTITY);
    }

    #[test]
    fn yaw_rotation_reported_in_degrees() {
        let mut f = FilterConfig::default();
        f.sample_period = 0.01;
        let mut filter = OrientationFilter::new(f).unwrap();
        // 90 degrees about +Y over one second.
        for _ in 0..100 {
            filter.update_6dof(Vec3::new(0.0, std::f32::consts::FRAC_PI_2, 0.0), Vec3::ZERO);
        }
        let (yaw, pitch, roll) = filter.euler_degrees();
        assert!((yaw - 90.0).abs() < 0.5, "yaw {yaw}");
        assert!(pitch.abs() < 0.5 && roll.abs() < 0.5);
    }

    #[test]
    fn config_from_settings_validates() {
        let settings = hmdlink_settings::SettingsRegistry::new();
        let config = FilterConfig::from_settings(&settings).unwrap();
        assert_eq!(config, FilterConfig::default());
    }
}
