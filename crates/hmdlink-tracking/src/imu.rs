//! IMU sample payloads.
//!
//! Little-endian IEEE-754, laid out by length:
//!
//! | Bytes | Fields |
//! |---|---|
//! | 12 | gyro |
//! | 24 | gyro, accel |
//! | 36 | gyro, accel, mag |
//! | 20 / 32 / 44 | f64 timestamp, then as above |
//!
//! Gyro is rad/s. Accel and mag are normalized by the filter, so any unit works.

use bytes::{Buf, BufMut, BytesMut};
use glam::Vec3;
use tracing::debug;

use crate::error::{Result, TrackingError};

const VEC3_SIZE: usize = 12;
const TIMESTAMP_SIZE: usize = 8;

/// One inertial measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuSample {
    pub gyro: Vec3,
    pub accel: Vec3,
    pub mag: Vec3,
    /// Seconds, strictly increasing within a stream.
    pub timestamp: f64,
}

impl ImuSample {
    /// Parse a payload. `fallback_timestamp` stamps layouts without one.
    pub fn parse(payload: &[u8], fallback_timestamp: f64) -> Result<Self> {
        let (has_timestamp, vectors) = match payload.len() {
            12 | 24 | 36 => (false, payload.len() / VEC3_SIZE),
            20 | 32 | 44 => (true, (payload.len() - TIMESTAMP_SIZE) / VEC3_SIZE),
            other => return Err(TrackingError::MalformedImu(other)),
        };

        let mut buf = payload;
        let timestamp = if has_timestamp {
            buf.get_f64_le()
        } else {
            fallback_timestamp
        };
        let mut next = |present: bool| {
            if present {
                Vec3::new(buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le())
            } else {
                Vec3::ZERO
            }
        };

        Ok(Self {
            gyro: next(true),
            accel: next(vectors >= 2),
            mag: next(vectors >= 3),
            timestamp,
        })
    }

    /// Encode in the 44-byte timestamped layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::with_capacity(TIMESTAMP_SIZE + 3 * VEC3_SIZE);
        out.put_f64_le(self.timestamp);
        for v in [self.gyro, self.accel, self.mag] {
            out.put_f32_le(v.x);
            out.put_f32_le(v.y);
            out.put_f32_le(v.z);
        }
        out.to_vec()
    }

    pub fn is_finite(&self) -> bool {
        self.gyro.is_finite()
            && self.accel.is_finite()
            && self.mag.is_finite()
            && self.timestamp.is_finite()
    }
}

/// Counters kept by [`ImuValidator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidatorStats {
    pub accepted: u64,
    pub non_finite: u64,
    pub out_of_order: u64,
}

/// Drops non-finite samples and samples whose timestamp does not advance.
#[derive(Debug, Default)]
pub struct ImuValidator {
    last_timestamp: Option<f64>,
    stats: ValidatorStats,
}

impl ImuValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the sample should reach the filter.
    pub fn accept(&mut self, sample: &ImuSample) -> bool {
        if !sample.is_finite() {
            self.stats.non_finite += 1;
            debug!(dropped = self.stats.non_finite, "dropping non-finite IMU sample");
            return false;
        }
        if self
            .last_timestamp
            .is_some_and(|last| sample.timestamp <= last)
        {
            self.stats.out_of_order += 1;
            debug!(
                timestamp = sample.timestamp,
                dropped = self.stats.out_of_order,
                "dropping non-increasing IMU timestamp"
            );
            return false;
        }
        self.last_timestamp = Some(sample.timestamp);
        self.stats.accepted += 1;
        true
    }

    pub fn stats(&self) -> ValidatorStats {
        self.stats
    }
}
