//! Canonical state, input and acceleration types
//!
//! The vehicle state is 12-dimensional: position, Euler attitude,
//! linear velocity and body angular rates. The input is 8-dimensional:
//! four rotor thrust magnitudes and four rotor tilt angles. The six
//! accelerations are algebraic variables tied to state and input through
//! the dynamics residual, not free degrees of freedom.

use nalgebra::{SVector, Vector3, Vector4};
use serde::{Deserialize, Serialize};

/// Flat 12-dim state vector layout
pub type StateVector = SVector<f64, 12>;
/// Flat 8-dim input vector layout
pub type InputVector = SVector<f64, 8>;
/// Flat 6-dim acceleration vector layout
pub type AccelVector = SVector<f64, 6>;

/// Named indices into the flat state vector
///
/// Replaces string-keyed variable access with typed indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum StateIndex {
    X = 0,
    Y = 1,
    Z = 2,
    Roll = 3,
    Pitch = 4,
    Yaw = 5,
    Vx = 6,
    Vy = 7,
    Vz = 8,
    RollRate = 9,
    PitchRate = 10,
    YawRate = 11,
}

/// Named indices into the flat input vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum InputIndex {
    Thrust1 = 0,
    Thrust2 = 1,
    Thrust3 = 2,
    Thrust4 = 3,
    Tilt1 = 4,
    Tilt2 = 5,
    Tilt3 = 6,
    Tilt4 = 7,
}

/// Vehicle state
///
/// Angles are Euler angles in the convention of
/// [`crate::rotation::euler_from_rotation`], defined modulo 2π and
/// singular at pitch = ±π/2.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Position [m] (world frame)
    pub position: Vector3<f64>,
    /// Attitude (roll, pitch, yaw) [rad]
    pub attitude: Vector3<f64>,
    /// Linear velocity [m/s]
    pub velocity: Vector3<f64>,
    /// Angular rates (roll, pitch, yaw) [rad/s]
    pub rates: Vector3<f64>,
}

impl Default for State {
    fn default() -> Self {
        Self::zero()
    }
}

impl State {
    /// State at the origin, level and at rest
    pub fn zero() -> Self {
        Self {
            position: Vector3::zeros(),
            attitude: Vector3::zeros(),
            velocity: Vector3::zeros(),
            rates: Vector3::zeros(),
        }
    }

    pub fn roll(&self) -> f64 {
        self.attitude.x
    }

    pub fn pitch(&self) -> f64 {
        self.attitude.y
    }

    pub fn yaw(&self) -> f64 {
        self.attitude.z
    }

    /// Pack into the flat 12-dim layout
    pub fn to_vector(&self) -> StateVector {
        let mut v = StateVector::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.position);
        v.fixed_rows_mut::<3>(3).copy_from(&self.attitude);
        v.fixed_rows_mut::<3>(6).copy_from(&self.velocity);
        v.fixed_rows_mut::<3>(9).copy_from(&self.rates);
        v
    }

    /// Unpack from the flat 12-dim layout
    pub fn from_vector(v: &StateVector) -> Self {
        Self {
            position: v.fixed_rows::<3>(0).into_owned(),
            attitude: v.fixed_rows::<3>(3).into_owned(),
            velocity: v.fixed_rows::<3>(6).into_owned(),
            rates: v.fixed_rows::<3>(9).into_owned(),
        }
    }

    /// True when every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|x| x.is_finite())
    }
}

/// Rotor command: four thrust magnitudes and four tilt angles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Input {
    /// Per-rotor thrust [N], non-negative
    pub thrust: Vector4<f64>,
    /// Per-rotor tilt angle [rad], bounded to ±π/2
    pub tilt: Vector4<f64>,
}

impl Default for Input {
    fn default() -> Self {
        Self::zero()
    }
}

impl Input {
    pub fn zero() -> Self {
        Self {
            thrust: Vector4::zeros(),
            tilt: Vector4::zeros(),
        }
    }

    /// Hover equilibrium input: each rotor carries a quarter of the
    /// weight, zero tilt. Satisfies ΣTᵢcosθᵢ = m·g.
    pub fn hover(mass: f64, gravity: f64) -> Self {
        Self {
            thrust: Vector4::from_element(mass * gravity / 4.0),
            tilt: Vector4::zeros(),
        }
    }

    /// Pack into the flat 8-dim layout
    pub fn to_vector(&self) -> InputVector {
        let mut v = InputVector::zeros();
        v.fixed_rows_mut::<4>(0).copy_from(&self.thrust);
        v.fixed_rows_mut::<4>(4).copy_from(&self.tilt);
        v
    }

    /// Unpack from the flat 8-dim layout
    pub fn from_vector(v: &InputVector) -> Self {
        Self {
            thrust: v.fixed_rows::<4>(0).into_owned(),
            tilt: v.fixed_rows::<4>(4).into_owned(),
        }
    }

    /// Clip thrusts to [0, thrust_limit] and tilts to ±tilt_limit.
    ///
    /// Returns the clipped input and the largest violation magnitude,
    /// so callers can log residual constraint violations.
    pub fn clamped(&self, thrust_limit: f64, tilt_limit: f64) -> (Self, f64) {
        let mut out = *self;
        let mut worst: f64 = 0.0;
        for i in 0..4 {
            let t = self.thrust[i].clamp(0.0, thrust_limit);
            worst = worst.max((t - self.thrust[i]).abs());
            out.thrust[i] = t;

            let a = self.tilt[i].clamp(-tilt_limit, tilt_limit);
            worst = worst.max((a - self.tilt[i]).abs());
            out.tilt[i] = a;
        }
        (out, worst)
    }

    pub fn is_finite(&self) -> bool {
        self.to_vector().iter().all(|x| x.is_finite())
    }
}

/// Algebraic acceleration variables
///
/// Must satisfy the dynamics residual at every horizon node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Acceleration {
    /// Linear acceleration [m/s²]
    pub linear: Vector3<f64>,
    /// Angular acceleration [rad/s²]
    pub angular: Vector3<f64>,
}

impl Acceleration {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn to_vector(&self) -> AccelVector {
        let mut v = AccelVector::zeros();
        v.fixed_rows_mut::<3>(0).copy_from(&self.linear);
        v.fixed_rows_mut::<3>(3).copy_from(&self.angular);
        v
    }

    pub fn from_vector(v: &AccelVector) -> Self {
        Self {
            linear: v.fixed_rows::<3>(0).into_owned(),
            angular: v.fixed_rows::<3>(3).into_owned(),
        }
    }
}

/// Reference operating point for the locally-linear model variant
///
/// Last known state, last applied input and last measured acceleration.
/// Supplied explicitly into every solve; held constant across the
/// horizon unless updated by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatingPoint {
    pub state: State,
    pub input: Input,
    pub acceleration: Acceleration,
}

impl Default for OperatingPoint {
    fn default() -> Self {
        Self {
            state: State::zero(),
            input: Input::zero(),
            acceleration: Acceleration::zero(),
        }
    }
}

impl OperatingPoint {
    /// Operating point at rest with the hover input
    pub fn hover(mass: f64, gravity: f64) -> Self {
        Self {
            state: State::zero(),
            input: Input::hover(mass, gravity),
            acceleration: Acceleration::zero(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_state_vector_roundtrip() {
        let state = State {
            position: Vector3::new(1.0, 2.0, 3.0),
            attitude: Vector3::new(0.1, -0.2, 0.3),
            velocity: Vector3::new(-1.0, 0.5, 0.25),
            rates: Vector3::new(0.01, 0.02, -0.03),
        };

        let v = state.to_vector();
        let recovered = State::from_vector(&v);

        assert_relative_eq!(
            (recovered.position - state.position).norm(),
            0.0,
            epsilon = 1e-12
        );
        assert_relative_eq!((recovered.rates - state.rates).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_state_index_layout() {
        let mut v = StateVector::zeros();
        v[StateIndex::Pitch as usize] = 0.7;
        v[StateIndex::Vz as usize] = -1.5;

        let state = State::from_vector(&v);
        assert_relative_eq!(state.pitch(), 0.7);
        assert_relative_eq!(state.velocity.z, -1.5);
    }

    #[test]
    fn test_input_vector_roundtrip() {
        let input = Input {
            thrust: Vector4::new(1.0, 2.0, 3.0, 4.0),
            tilt: Vector4::new(0.1, -0.1, 0.2, -0.2),
        };

        let recovered = Input::from_vector(&input.to_vector());
        assert_relative_eq!((recovered.thrust - input.thrust).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((recovered.tilt - input.tilt).norm(), 0.0, epsilon = 1e-12);

        let v = input.to_vector();
        assert_relative_eq!(v[InputIndex::Thrust2 as usize], 2.0);
        assert_relative_eq!(v[InputIndex::Tilt1 as usize], 0.1);
    }

    #[test]
    fn test_hover_input_balances_weight() {
        let input = Input::hover(0.5, 9.81);
        let lift: f64 = (0..4).map(|i| input.thrust[i] * input.tilt[i].cos()).sum();
        assert_relative_eq!(lift, 0.5 * 9.81, epsilon = 1e-12);
        assert_relative_eq!(input.tilt.norm(), 0.0);
    }

    #[test]
    fn test_clamp_reports_violation() {
        let input = Input {
            thrust: Vector4::new(-1.0, 5.0, 11.0, 2.0),
            tilt: Vector4::new(2.0, 0.0, 0.0, 0.0),
        };

        let (clamped, worst) = input.clamped(10.0, std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(clamped.thrust[0], 0.0);
        assert_relative_eq!(clamped.thrust[2], 10.0);
        assert_relative_eq!(clamped.tilt[0], std::f64::consts::FRAC_PI_2);
        assert!(worst > 0.0);

        let (unchanged, none) = clamped.clamped(10.0, std::f64::consts::FRAC_PI_2);
        assert_relative_eq!(none, 0.0);
        assert_eq!(unchanged, clamped);
    }
}
