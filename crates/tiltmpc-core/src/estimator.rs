//! State estimation from raw sensor data
//!
//! Maps the raw sensor vector (four tilt angle/rate pairs plus body
//! velocities) and the measured rotation matrix into the canonical
//! 12-dim state. Roll-rate and yaw-rate are distinct channels; the
//! orientation extraction detects the pitch = ±π/2 singularity and
//! either rejects the sample or clamps it as a degraded estimate.

use log::warn;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rotation::{euler_from_rotation, SingularOrientation, SINGULARITY_THRESHOLD};
use crate::state::State;

/// Estimation errors
#[derive(Debug, Error)]
pub enum EstimatorError {
    #[error("degraded orientation estimate: {0}")]
    OrientationSingularity(#[from] SingularOrientation),
    #[error("non-finite sensor sample")]
    NonFiniteSample,
}

/// One rotor tilt servo measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TiltMeasurement {
    /// Tilt angle [rad]
    pub angle: f64,
    /// Tilt angular velocity [rad/s]
    pub rate: f64,
}

/// Raw sensor snapshot for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSensors {
    /// Per-rotor tilt angle and rate
    pub tilt: [TiltMeasurement; 4],
    /// Position [m]
    pub position: Vector3<f64>,
    /// Body rotation matrix
    pub rotation: Matrix3<f64>,
    /// Linear velocity [m/s]
    pub linear_velocity: Vector3<f64>,
    /// Angular rates (roll, pitch, yaw) [rad/s], one channel per axis
    pub angular_velocity: Vector3<f64>,
}

impl Default for RawSensors {
    fn default() -> Self {
        Self {
            tilt: [TiltMeasurement::default(); 4],
            position: Vector3::zeros(),
            rotation: Matrix3::identity(),
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
        }
    }
}

impl RawSensors {
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|x| x.is_finite())
            && self.rotation.iter().all(|x| x.is_finite())
            && self.linear_velocity.iter().all(|x| x.is_finite())
            && self.angular_velocity.iter().all(|x| x.is_finite())
            && self
                .tilt
                .iter()
                .all(|t| t.angle.is_finite() && t.rate.is_finite())
    }
}

/// What to do when the orientation extraction hits the singularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingularityPolicy {
    /// Surface an error; the caller decides how to degrade
    Reject,
    /// Clamp |cos(pitch)| to the threshold and keep going
    Clamp,
}

/// Maps raw sensors to the canonical state
#[derive(Debug, Clone)]
pub struct StateEstimator {
    threshold: f64,
    policy: SingularityPolicy,
}

impl Default for StateEstimator {
    fn default() -> Self {
        Self::new(SINGULARITY_THRESHOLD, SingularityPolicy::Reject)
    }
}

impl StateEstimator {
    pub fn new(threshold: f64, policy: SingularityPolicy) -> Self {
        Self { threshold, policy }
    }

    /// Produce the canonical state for one sensor snapshot
    pub fn estimate(&self, raw: &RawSensors) -> Result<State, EstimatorError> {
        if !raw.is_finite() {
            return Err(EstimatorError::NonFiniteSample);
        }

        let attitude = match euler_from_rotation(&raw.rotation, self.threshold) {
            Ok(angles) => angles,
            Err(singular) => match self.policy {
                SingularityPolicy::Reject => return Err(singular.into()),
                SingularityPolicy::Clamp => {
                    warn!(
                        "orientation near gimbal lock (pitch {:.4}), clamping extraction",
                        singular.pitch
                    );
                    self.clamped_attitude(&raw.rotation, singular.pitch)
                }
            },
        };

        Ok(State {
            position: raw.position,
            attitude,
            velocity: raw.linear_velocity,
            rates: raw.angular_velocity,
        })
    }

    /// Degraded extraction with |cos(pitch)| clamped to the threshold
    fn clamped_attitude(&self, r: &Matrix3<f64>, pitch: f64) -> Vector3<f64> {
        let cos_pitch = self.threshold;
        let roll = (-r[(1, 0)] / cos_pitch).atan2(r[(1, 1)] / cos_pitch);
        let yaw = (-r[(0, 2)] / cos_pitch).atan2(r[(2, 2)] / cos_pitch);
        Vector3::new(roll, pitch, yaw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::rotation_from_euler;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    fn sensors_with_attitude(roll: f64, pitch: f64, yaw: f64) -> RawSensors {
        RawSensors {
            rotation: rotation_from_euler(roll, pitch, yaw),
            ..RawSensors::default()
        }
    }

    #[test]
    fn test_estimate_recovers_attitude() {
        let estimator = StateEstimator::default();
        let raw = sensors_with_attitude(0.2, -0.3, 1.1);

        let state = estimator.estimate(&raw).unwrap();
        assert_relative_eq!(state.roll(), 0.2, epsilon = 1e-9);
        assert_relative_eq!(state.pitch(), -0.3, epsilon = 1e-9);
        assert_relative_eq!(state.yaw(), 1.1, epsilon = 1e-9);
    }

    #[test]
    fn test_rate_channels_are_distinct() {
        let estimator = StateEstimator::default();
        let raw = RawSensors {
            angular_velocity: Vector3::new(0.1, 0.2, 0.3),
            ..RawSensors::default()
        };

        let state = estimator.estimate(&raw).unwrap();
        assert_relative_eq!(state.rates.x, 0.1);
        assert_relative_eq!(state.rates.y, 0.2);
        assert_relative_eq!(state.rates.z, 0.3);
        assert!(state.rates.x != state.rates.z);
    }

    #[test]
    fn test_reject_policy_surfaces_singularity() {
        let estimator = StateEstimator::new(SINGULARITY_THRESHOLD, SingularityPolicy::Reject);
        let raw = sensors_with_attitude(0.0, FRAC_PI_2, 0.0);

        match estimator.estimate(&raw) {
            Err(EstimatorError::OrientationSingularity(_)) => {}
            other => panic!("expected singularity error, got {other:?}"),
        }
    }

    #[test]
    fn test_clamp_policy_returns_finite_state() {
        let estimator = StateEstimator::new(SINGULARITY_THRESHOLD, SingularityPolicy::Clamp);
        let raw = sensors_with_attitude(0.0, FRAC_PI_2, 0.0);

        let state = estimator.estimate(&raw).unwrap();
        assert!(state.is_finite());
        assert_relative_eq!(state.pitch(), FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn test_non_finite_sample_rejected() {
        let estimator = StateEstimator::default();
        let raw = RawSensors {
            linear_velocity: Vector3::new(f64::NAN, 0.0, 0.0),
            ..RawSensors::default()
        };
        assert!(matches!(
            estimator.estimate(&raw),
            Err(EstimatorError::NonFiniteSample)
        ));
    }
}
