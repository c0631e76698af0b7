//! Vergence-based gaze distance.
//!
//! Raw eye vectors (pixel deltas from the eye tracker) are mapped to per-eye
//! yaw/pitch with a calibrated polynomial, the horizontal vergence is turned
//! into a fixation distance, and a scene raycast takes over when the vergence
//! estimate is unusable or beyond the near field.

use std::sync::Arc;

use bytes::Buf;
use glam::Vec2;
use hmdlink_settings::{Setting, SettingsProvider};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TrackingError};

const EYE_VECTOR_SIZE: usize = 16;

/// A value per eye.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePair<T> {
    pub left: T,
    pub right: T,
}

/// Polynomial coefficients, highest degree first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisFit {
    pub yaw: Vec<f32>,
    pub pitch: Vec<f32>,
}

/// `distance = a / vergence_rad + b`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceFit {
    pub a: f32,
    pub b: f32,
}

/// Per-user calibration produced by the perception unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratedGazeModel {
    /// Raw vector when looking at infinity.
    pub reference: EyePair<[f32; 2]>,
    pub angle_fit: EyePair<AxisFit>,
    pub distance_fit: DistanceFit,
}

impl CalibratedGazeModel {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: Self = serde_json::from_slice(bytes)?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let model = Self::deserialize(value)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        let reference = self.reference.left.iter().chain(&self.reference.right);
        if reference.copied().any(|v| !v.is_finite()) {
            return Err(TrackingError::InvalidCalibration(
                "reference vectors must be finite".into(),
            ));
        }
        for (eye, fit) in [("left", &self.angle_fit.left), ("right", &self.angle_fit.right)] {
            for (axis, coefficients) in [("yaw", &fit.yaw), ("pitch", &fit.pitch)] {
                if coefficients.is_empty() {
                    return Err(TrackingError::InvalidCalibration(format!(
                        "{eye} {axis} fit has no coefficients"
                    )));
                }
                if coefficients.iter().any(|c| !c.is_finite()) {
                    return Err(TrackingError::InvalidCalibration(format!(
                        "{eye} {axis} fit has non-finite coefficients"
                    )));
                }
            }
        }
        if !(self.distance_fit.a.is_finite() && self.distance_fit.b.is_finite()) {
            return Err(TrackingError::InvalidCalibration(
                "distance fit must be finite".into(),
            ));
        }
        Ok(())
    }

    fn angles(&self, raw: Vec2, reference: [f32; 2], fit: &AxisFit) -> EyeAngles {
        let delta = raw - Vec2::from(reference);
        EyeAngles {
            yaw: horner(&fit.yaw, delta.x),
            pitch: horner(&fit.pitch, delta.y),
        }
    }
}

/// Evaluate a polynomial with coefficients ordered highest degree first.
pub fn horner(coefficients: &[f32], x: f32) -> f32 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

/// Raw eye-tracker output for one camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeVectorSample {
    pub left: Vec2,
    pub right: Vec2,
}

impl EyeVectorSample {
    /// Parse `lx, ly, rx, ry` as little-endian f32.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != EYE_VECTOR_SIZE {
            return Err(TrackingError::MalformedEyeVectors(payload.len()));
        }
        let mut buf = payload;
        let left = Vec2::new(buf.get_f32_le(), buf.get_f32_le());
        let right = Vec2::new(buf.get_f32_le(), buf.get_f32_le());
        Ok(Self { left, right })
    }

    pub fn encode(&self) -> Vec<u8> {
        [self.left.x, self.left.y, self.right.x, self.right.y]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

/// Degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EyeAngles {
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceSource {
    Vergence,
    Raycast,
}

/// Everything derived from one eye sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeEstimate {
    pub left: EyeAngles,
    pub right: EyeAngles,
    /// Horizontal vergence in degrees.
    pub vergence_deg: f32,
    /// Averaged direction of both eyes.
    pub cyclopean: EyeAngles,
    /// Distance from vergence alone; infinite below the epsilon.
    pub vergence_distance: f32,
    /// Distance to report, in meters.
    pub distance: f32,
    pub source: DistanceSource,
}

/// Scene query provided by the renderer.
pub trait SceneRaycaster: Send + Sync {
    /// Distance to the first hit along the head-relative direction, if any.
    fn raycast(&self, yaw_deg: f32, pitch_deg: f32) -> Option<f32>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GazeConfig {
    /// Vergence distances beyond this (meters) defer to the raycast.
    pub near_field_threshold: f32,
    pub vergence_epsilon_deg: f32,
    /// Raycast along the gaze direction rather than straight ahead.
    pub angular_tracking: bool,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            near_field_threshold: 2.0,
            vergence_epsilon_deg: 0.05,
            angular_tracking: true,
        }
    }
}

impl GazeConfig {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Result<Self> {
        let config = Self {
            near_field_threshold: settings.number(Setting::NearFieldThreshold)? as f32,
            vergence_epsilon_deg: settings.number(Setting::VergenceEpsilonDeg)? as f32,
            angular_tracking: settings.flag(Setting::AngularTracking)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.near_field_threshold.is_finite() && self.near_field_threshold > 0.0) {
            return Err(TrackingError::InvalidThreshold {
                name: "near_field_threshold",
                value: self.near_field_threshold,
            });
        }
        if !(self.vergence_epsilon_deg.is_finite() && self.vergence_epsilon_deg >= 0.0) {
            return Err(TrackingError::InvalidThreshold {
                name: "vergence_epsilon_deg",
                value: self.vergence_epsilon_deg,
            });
        }
        Ok(())
    }
}

/// Turns eye samples into fixation distances.
///
/// Safe to share between the eye worker and the calibration worker: the model
/// is swapped as a whole and each estimate works from one snapshot of it.
pub struct GazeDistanceEstimator {
    model: RwLock<Option<Arc<CalibratedGazeModel>>>,
    config: RwLock<GazeConfig>,
    raycaster: Option<Arc<dyn SceneRaycaster>>,
}

impl GazeDistanceEstimator {
    pub fn new(config: GazeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model: RwLock::new(None),
            config: RwLock::new(config),
            raycaster: None,
        })
    }

    pub fn with_raycaster(mut self, raycaster: Arc<dyn SceneRaycaster>) -> Self {
        self.raycaster = Some(raycaster);
        self
    }

    /// Replace the active calibration.
    pub fn install_calibration(&self, model: CalibratedGazeModel) -> Result<()> {
        model.validate()?;
        info!(
            a = model.distance_fit.a,
            b = model.distance_fit.b,
            "gaze calibration installed"
        );
        *self.model.write() = Some(Arc::new(model));
        Ok(())
    }

    pub fn clear_calibration(&self) {
        *self.model.write() = None;
    }

    pub fn has_calibration(&self) -> bool {
        self.model.read().is_some()
    }

    pub fn calibration(&self) -> Option<Arc<CalibratedGazeModel>> {
        self.model.read().clone()
    }

    pub fn config(&self) -> GazeConfig {
        *self.config.read()
    }

    pub fn set_config(&self, config: GazeConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    /// `None` until a calibration is installed.
    pub fn estimate(&self, sample: &EyeVectorSample) -> Option<GazeEstimate> {
        let model = self.model.read().clone()?;
        let config = self.config();

        let left = model.angles(sample.left, model.reference.left, &model.angle_fit.left);
        let right = model.angles(sample.right, model.reference.right, &model.angle_fit.right);

        let vergence_deg = (left.yaw - right.yaw).abs();
        let vergence_distance = if vergence_deg < config.vergence_epsilon_deg {
            f32::INFINITY
        } else {
            let DistanceFit { a, b } = model.distance_fit;
            (a * (1.0 / vergence_deg.to_radians()) + b).max(0.0)
        };

        let cyclopean = EyeAngles {
            yaw: (left.yaw + right.yaw) * 0.5,
            pitch: (left.pitch + right.pitch) * 0.5,
        };

        let mut distance = vergence_distance;
        let mut source = DistanceSource::Vergence;
        if !vergence_distance.is_finite() || vergence_distance > config.near_field_threshold {
            let direction = if config.angular_tracking {
                cyclopean
            } else {
                EyeAngles::default()
            };
            if let Some(hit) = self
                .raycaster
                .as_ref()
                .and_then(|r| r.raycast(direction.yaw, direction.pitch))
            {
                distance = hit;
                source = DistanceSource::Raycast;
            }
        }

        debug!(vergence_deg, distance, ?source, "gaze estimate");
        Some(GazeEstimate {
            left,
            right,
            vergence_deg,
            cyclopean,
            vergence_distance,
            distance,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Angles equal the raw delta; distance = a / vergence + b.
    fn linear_model(a: f32, b: f32) -> CalibratedGazeModel {
        let identity = AxisFit {
            yaw: vec![1.0, 0.0],
            pitch: vec![1.0, 0.0],
        };
        CalibratedGazeModel {
            reference: EyePair {
                left: [0.0, 0.0],
                right: [0.0, 0.0],
            },
            angle_fit: EyePair {
                left: identity.clone(),
                right: identity,
            },
            distance_fit: DistanceFit { a, b },
        }
    }

    fn sample(lx: f32, rx: f32) -> EyeVectorSample {
        EyeVectorSample {
            left: Vec2::new(lx, 0.0),
            right: Vec2::new(rx, 0.0),
        }
    }

    struct FixedRaycast {
        distance: f32,
        last_yaw_bits: AtomicU32,
    }

    impl SceneRaycaster for FixedRaycast {
        fn raycast(&self, yaw_deg: f32, _pitch_deg: f32) -> Option<f32> {
            self.last_yaw_bits.store(yaw_deg.to_bits(), Ordering::Relaxed);
            Some(self.distance)
        }
    }

    fn raycaster(distance: f32) -> Arc<FixedRaycast> {
        Arc::new(FixedRaycast {
            distance,
            last_yaw_bits: AtomicU32::new(0),
        })
    }

    #[test]
    fn horner_orders_highest_degree_first() {
        // 2x^2 + 3x + 4
        assert_eq!(horner(&[2.0, 3.0, 4.0], 2.0), 18.0);
        assert_eq!(horner(&[5.0], 100.0), 5.0);
        assert_eq!(horner(&[], 1.0), 0.0);
    }

    #[test]
    fn no_estimate_without_calibration() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        assert!(estimator.estimate(&sample(1.0, 0.0)).is_none());
    }

    #[test]
    fn one_radian_of_vergence_is_one_meter() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        estimator.install_calibration(linear_model(1.0, 0.0)).unwrap();

        let estimate = estimator
            .estimate(&sample(1.0f32.to_degrees(), 0.0))
            .unwrap();
        assert!((estimate.distance - 1.0).abs() < 1e-5);
        assert_eq!(estimate.source, DistanceSource::Vergence);
        assert!((estimate.cyclopean.yaw - 0.5f32.to_degrees()).abs() < 1e-4);
    }

    #[test]
    fn zero_vergence_is_infinite_without_raycaster() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        estimator.install_calibration(linear_model(1.0, 0.0)).unwrap();

        let estimate = estimator.estimate(&sample(3.0, 3.0)).unwrap();
        assert_eq!(estimate.vergence_deg, 0.0);
        assert!(estimate.distance.is_infinite());
        assert_eq!(estimate.source, DistanceSource::Vergence);
    }

    #[test]
    fn zero_vergence_falls_back_to_raycast() {
        let ray = raycaster(7.5);
        let estimator = GazeDistanceEstimator::new(GazeConfig::default())
            .unwrap()
            .with_raycaster(ray.clone());
        estimator.install_calibration(linear_model(1.0, 0.0)).unwrap();

        let estimate = estimator.estimate(&sample(10.0, 10.0)).unwrap();
        assert_eq!(estimate.distance, 7.5);
        assert_eq!(estimate.source, DistanceSource::Raycast);
        assert_eq!(f32::from_bits(ray.last_yaw_bits.load(Ordering::Relaxed)), 10.0);
    }

    #[test]
    fn far_vergence_defers_to_raycast_straight_ahead_when_untracked() {
        let ray = raycaster(4.0);
        let config = GazeConfig {
            angular_tracking: false,
            ..GazeConfig::default()
        };
        let estimator = GazeDistanceEstimator::new(config)
            .unwrap()
            .with_raycaster(ray.clone());
        estimator.install_calibration(linear_model(1.0, 0.0)).unwrap();

        // 10 degrees of vergence is ~5.7 m, beyond the 2 m near field.
        let estimate = estimator.estimate(&sample(15.0, 5.0)).unwrap();
        assert!(estimate.vergence_distance > 2.0);
        assert_eq!(estimate.source, DistanceSource::Raycast);
        assert_eq!(f32::from_bits(ray.last_yaw_bits.load(Ordering::Relaxed)), 0.0);
    }

    #[test]
    fn negative_distance_clamps_to_zero() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        estimator.install_calibration(linear_model(1.0, -5.0)).unwrap();

        let estimate = estimator
            .estimate(&sample(1.0f32.to_degrees(), 0.0))
            .unwrap();
        assert_eq!(estimate.distance, 0.0);
    }

    #[test]
    fn reference_vectors_are_subtracted() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        let mut model = linear_model(1.0, 0.0);
        model.reference.left = [5.0, 1.0];
        estimator.install_calibration(model).unwrap();

        let estimate = estimator
            .estimate(&EyeVectorSample {
                left: Vec2::new(5.0, 3.0),
                right: Vec2::new(0.0, 0.0),
            })
            .unwrap();
        assert_eq!(estimate.left, EyeAngles { yaw: 0.0, pitch: 2.0 });
    }

    #[test]
    fn calibration_json_shape() {
        let json = br#"{
            "reference": {"left": [0.5, -0.5], "right": [0.0, 0.0]},
            "angle_fit": {
                "left": {"yaw": [0.1, 2.0, 0.0], "pitch": [1.0, 0.0]},
                "right": {"yaw": [2.0, 0.0], "pitch": [1.0, 0.0]}
            },
            "distance_fit": {"a": 0.065, "b": 0.02}
        }"#;
        let model = CalibratedGazeModel::from_json(json).unwrap();
        assert_eq!(model.angle_fit.left.yaw.len(), 3);
        assert_eq!(model.distance_fit.a, 0.065);
    }

    #[test]
    fn invalid_calibration_rejected_and_previous_kept() {
        let estimator = GazeDistanceEstimator::new(GazeConfig::default()).unwrap();
        estimator.install_calibration(linear_model(1.0, 0.0)).unwrap();

        let mut broken = linear_model(2.0, 0.0);
        broken.angle_fit.right.pitch.clear();
        assert!(matches!(
            estimator.install_calibration(broken),
            Err(TrackingError::InvalidCalibration(_))
        ));
        assert_eq!(estimator.calibration().unwrap().distance_fit.a, 1.0);
    }

    #[test]
    fn eye_vector_payload() {
        let original = EyeVectorSample {
            left: Vec2::new(1.0, -2.0),
            right: Vec2::new(0.25, 8.0),
        };
        let wire = original.encode();
        assert_eq!(wire.len(), 16);
        assert_eq!(&wire[..4], &1.0f32.to_le_bytes());
        assert_eq!(EyeVectorSample::parse(&wire).unwrap(), original);
        assert!(matches!(
            EyeVectorSample::parse(&wire[..12]),
            Err(TrackingError::MalformedEyeVectors(12))
        ));
    }
}
