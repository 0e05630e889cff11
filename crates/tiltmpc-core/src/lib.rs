//! # tiltmpc-core
//!
//! Rigid-body model, state estimation and simulation support for a
//! tilt-rotor quadrotor: a quadrotor whose four rotors can independently
//! vary both thrust magnitude and tilt angle.
//!
//! ## Modules
//!
//! - [`state`]: canonical state, input and acceleration types
//! - [`dynamics`]: Newton-Euler dynamics, DAE residual and linearization
//! - [`rotation`]: rotation-matrix / Euler-angle conversions
//! - [`estimator`]: raw-sensor to canonical-state mapping
//! - [`integrator`]: RK4 / Euler integration helpers
//! - [`sim`]: plant interface and simulated plant

pub mod dynamics;
pub mod estimator;
pub mod integrator;
pub mod rotation;
pub mod sim;
pub mod state;

use nalgebra::{Matrix3, Vector3};

/// 3D vector type
pub type Vec3 = Vector3<f64>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f64>;

/// Gravity constant [m/s²]
pub const GRAVITY: f64 = 9.81;

pub use dynamics::{DynamicsModel, VehicleParams};
pub use estimator::{
    EstimatorError, RawSensors, SingularityPolicy, StateEstimator, TiltMeasurement,
};
pub use sim::{Plant, SensorRig, SimulatedPlant};
pub use state::{Acceleration, Input, OperatingPoint, State};
