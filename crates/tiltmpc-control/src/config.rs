//! Controller configuration
//!
//! Every tuning knob lives here, deserializable from TOML with defaults
//! matching the reference tuning for the 0.5 kg testbed vehicle.

use std::f64::consts::FRAC_PI_2;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiltmpc_core::dynamics::VehicleParams;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Horizon discretization
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Number of control intervals
    pub steps: usize,
    /// Interval length [s]
    pub dt: f64,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self { steps: 10, dt: 0.02 }
    }
}

impl HorizonConfig {
    /// Horizon length in seconds
    pub fn length(&self) -> f64 {
        self.steps as f64 * self.dt
    }
}

/// Objective weights
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Position tracking weight
    pub position: f64,
    /// Thrust magnitude penalty
    pub thrust: f64,
    /// Thrust slew penalty
    pub rate_thrust: f64,
    /// Tilt slew penalty
    pub rate_tilt: f64,
    /// Smoothing radius of the pseudo-Huber tracking terms
    pub huber_eps: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            position: 0.9,
            thrust: 2e-5,
            rate_thrust: 1e-4,
            rate_tilt: 1e-3,
            huber_eps: 0.05,
        }
    }
}

/// Hard operating limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Per-rotor thrust ceiling [N]
    pub thrust_max: f64,
    /// Tilt angle limit [rad]
    pub tilt_max: f64,
    /// Linear velocity limit per axis [m/s]
    pub velocity_max: f64,
    /// Angular rate limit per axis [rad/s]
    pub rate_max: f64,
    /// Roll/pitch/yaw angle limit [rad]
    pub angle_max: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            thrust_max: 10.0,
            tilt_max: FRAC_PI_2,
            velocity_max: 5.0,
            rate_max: 1.0,
            angle_max: FRAC_PI_2,
        }
    }
}

/// Solver iteration limits and tolerances
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Outer linearize-solve-update passes per tick
    pub max_sqp_iterations: usize,
    /// Inner QP iteration ceiling
    pub max_qp_iterations: u32,
    /// Inner QP absolute/relative tolerance
    pub qp_tolerance: f64,
    /// Outer loop terminates once the step falls below this
    pub step_tolerance: f64,
    /// State-box widening factor for the infeasibility retry
    pub relax_factor: f64,
    /// Diagonal damping added to the quadratic cost
    pub damping: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_sqp_iterations: 5,
            max_qp_iterations: 4000,
            qp_tolerance: 1e-5,
            step_tolerance: 1e-6,
            relax_factor: 10.0,
            damping: 1e-6,
        }
    }
}

/// Estimator behavior
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// |cos(pitch)| below this counts as gimbal lock
    pub singularity_threshold: f64,
    /// Clamp the degraded extraction instead of rejecting the sample
    pub clamp_on_singularity: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            singularity_threshold: 1e-6,
            clamp_on_singularity: false,
        }
    }
}

/// Tilt servo PD gains
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Proportional gain on tilt angle error
    pub kp: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self { kp: 0.005 }
    }
}

impl ServoConfig {
    /// Derivative gain, fixed at a tenth of the proportional gain
    pub fn kd(&self) -> f64 {
        self.kp / 10.0
    }
}

/// Failure handling policy of the outer loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// Consecutive held ticks tolerated before the loop gives up
    pub max_consecutive_failures: usize,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
        }
    }
}

/// Top-level controller configuration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub vehicle: VehicleParams,
    pub horizon: HorizonConfig,
    pub weights: WeightConfig,
    pub bounds: BoundsConfig,
    pub solver: SolverConfig,
    pub estimator: EstimatorConfig,
    pub servo: ServoConfig,
    pub failure: FailurePolicy,
}

impl ControlConfig {
    /// Parse from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon.steps == 0 {
            return Err(ConfigError::Invalid("horizon.steps must be >= 1".into()));
        }
        if self.horizon.dt <= 0.0 {
            return Err(ConfigError::Invalid("horizon.dt must be positive".into()));
        }
        if self.vehicle.mass <= 0.0 {
            return Err(ConfigError::Invalid("vehicle.mass must be positive".into()));
        }
        if self.bounds.thrust_max <= 0.0 || self.bounds.tilt_max <= 0.0 {
            return Err(ConfigError::Invalid(
                "bounds.thrust_max and bounds.tilt_max must be positive".into(),
            ));
        }
        if self.bounds.thrust_max * 4.0 < self.vehicle.mass * self.vehicle.gravity {
            return Err(ConfigError::Invalid(
                "thrust ceiling cannot lift the vehicle weight".into(),
            ));
        }
        if self.weights.huber_eps <= 0.0 {
            return Err(ConfigError::Invalid(
                "weights.huber_eps must be positive".into(),
            ));
        }
        if self.solver.relax_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "solver.relax_factor must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        ControlConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = ControlConfig::from_toml_str(
            r#"
            [horizon]
            steps = 20
            dt = 0.05

            [weights]
            position = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.horizon.steps, 20);
        assert_eq!(config.horizon.dt, 0.05);
        assert_eq!(config.weights.position, 1.5);
        // Untouched sections keep their defaults
        assert_eq!(config.bounds.thrust_max, 10.0);
        assert_eq!(config.vehicle.mass, 0.5);
    }

    #[test]
    fn test_rejects_degenerate_horizon() {
        let err = ControlConfig::from_toml_str("[horizon]\nsteps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_underpowered_vehicle() {
        let toml = r#"
            [vehicle]
            mass = 10.0

            [bounds]
            thrust_max = 1.0
        "#;
        assert!(ControlConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            ControlConfig::from_toml_str("horizon = nope"),
            Err(ConfigError::Parse(_))
        ));
    }
}
