//! Head tracking for the headset link.
//!
//! [`OrientationFilter`] fuses IMU samples into a head quaternion with an
//! adaptive gain. [`GazeDistanceEstimator`] turns calibrated eye vectors into a
//! fixation distance, and [`DistanceThrottle`] limits how often that distance
//! goes back over the link. [`PublishedOrientation`] and [`AtomicF32`] hand the
//! results to a render loop without locking.

pub mod error;
pub mod gaze;
pub mod imu;
pub mod orientation;
pub mod shared;
pub mod throttle;

pub use error::{Result, TrackingError};
pub use gaze::{
    horner, AxisFit, CalibratedGazeModel, DistanceFit, DistanceSource, EyeAngles, EyePair,
    EyeVectorSample, GazeConfig, GazeDistanceEstimator, GazeEstimate, SceneRaycaster,
};
pub use imu::{ImuSample, ImuValidator, ValidatorStats};
pub use orientation::{FilterConfig, FilterGains, FilterStats, OrientationFilter};
pub use shared::{AtomicF32, PublishedOrientation};
pub use throttle::{DistanceThrottle, ThrottleConfig};
