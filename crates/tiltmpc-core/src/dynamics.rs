//! Tilt-rotor quadrotor dynamics
//!
//! Newton-Euler rigid-body physics for four independently tilting thrust
//! vectors. With thrusts Tᵢ and tilt angles θᵢ the accelerations are
//!
//! ```text
//! m·ẍ   = T₂sinθ₂ − T₄sinθ₄ − m·g·sin(pitch)
//! m·ÿ   = T₁sinθ₁ − T₃sinθ₃ − m·g·sin(roll)
//! m·z̈   = ΣTᵢcosθᵢ − m·g·cos(roll)·cos(pitch)
//! Ixx·φ̈ = L(T₂cosθ₂ − T₄cosθ₄) + (Iyy−Izz)·q·vy
//! Iyy·θ̈ = L(T₁cosθ₁ − T₃cosθ₃) − (Ixx−Izz)·p·vy
//! Izz·ψ̈ = L·ΣTᵢsinθᵢ + (Ixx−Iyy)·p·q
//! ```
//!
//! The same physics is exposed three ways: as an explicit acceleration
//! function, as the implicit DAE residual enforced at every horizon node,
//! and as an affine model linearized about a reference operating point.

use nalgebra::{SMatrix, Vector3};
use serde::{Deserialize, Serialize};

use crate::state::{AccelVector, Acceleration, Input, OperatingPoint, State, StateVector};
use crate::GRAVITY;

/// Jacobian of the state derivative with respect to the state
pub type StateJacobian = SMatrix<f64, 12, 12>;
/// Jacobian of the state derivative with respect to the input
pub type InputJacobian = SMatrix<f64, 12, 8>;

/// Physical vehicle parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Vehicle mass [kg]
    pub mass: f64,
    /// Gravity [m/s²]
    pub gravity: f64,
    /// Rotor arm length [m]
    pub arm_length: f64,
    /// Principal moment of inertia about x [kg·m²]
    pub ixx: f64,
    /// Principal moment of inertia about y [kg·m²]
    pub iyy: f64,
    /// Principal moment of inertia about z [kg·m²]
    pub izz: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 0.5,
            gravity: GRAVITY,
            arm_length: 1.0,
            ixx: 1.2,
            iyy: 1.1,
            izz: 1.0,
        }
    }
}

impl VehicleParams {
    /// Total thrust needed to hover level
    pub fn hover_thrust(&self) -> f64 {
        self.mass * self.gravity
    }
}

/// Immutable rigid-body model
///
/// Built once at startup and consumed by the optimizer builder and the
/// simulated plant; construction has no side effects on shared state.
#[derive(Debug, Clone)]
pub struct DynamicsModel {
    params: VehicleParams,
}

impl DynamicsModel {
    pub fn new(params: VehicleParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &VehicleParams {
        &self.params
    }

    /// Explicit accelerations for a given state and input
    pub fn acceleration(&self, state: &State, input: &Input) -> Acceleration {
        let p = &self.params;
        let (m, g, l) = (p.mass, p.gravity, p.arm_length);

        let (t1, t2, t3, t4) = (input.thrust[0], input.thrust[1], input.thrust[2], input.thrust[3]);
        let (s1, s2, s3, s4) = (
            input.tilt[0].sin(),
            input.tilt[1].sin(),
            input.tilt[2].sin(),
            input.tilt[3].sin(),
        );
        let (c1, c2, c3, c4) = (
            input.tilt[0].cos(),
            input.tilt[1].cos(),
            input.tilt[2].cos(),
            input.tilt[3].cos(),
        );

        let roll = state.roll();
        let pitch = state.pitch();
        let vy = state.velocity.y;
        let (roll_rate, pitch_rate) = (state.rates.x, state.rates.y);

        let linear = Vector3::new(
            (t2 * s2 - t4 * s4 - m * g * pitch.sin()) / m,
            (t1 * s1 - t3 * s3 - m * g * roll.sin()) / m,
            (t1 * c1 + t2 * c2 + t3 * c3 + t4 * c4 - m * g * roll.cos() * pitch.cos()) / m,
        );
        let angular = Vector3::new(
            (l * (t2 * c2 - t4 * c4) + (p.iyy - p.izz) * pitch_rate * vy) / p.ixx,
            (l * (t1 * c1 - t3 * c3) - (p.ixx - p.izz) * roll_rate * vy) / p.iyy,
            (l * (t1 * s1 + t2 * s2 + t3 * s3 + t4 * s4) + (p.ixx - p.iyy) * roll_rate * pitch_rate)
                / p.izz,
        );

        Acceleration { linear, angular }
    }

    /// Implicit DAE residual; zero at every valid horizon node
    pub fn residual(&self, state: &State, input: &Input, accel: &Acceleration) -> AccelVector {
        let consistent = self.acceleration(state, input);
        accel.to_vector() - consistent.to_vector()
    }

    /// Full state derivative [velocity, rates, accelerations]
    pub fn derivative(&self, state: &State, input: &Input) -> StateVector {
        let accel = self.acceleration(state, input);
        let mut dx = StateVector::zeros();
        dx.fixed_rows_mut::<3>(0).copy_from(&state.velocity);
        dx.fixed_rows_mut::<3>(3).copy_from(&state.rates);
        dx.fixed_rows_mut::<3>(6).copy_from(&accel.linear);
        dx.fixed_rows_mut::<3>(9).copy_from(&accel.angular);
        dx
    }

    /// Analytic Jacobians of the state derivative
    ///
    /// Evaluated at the given state and input; refreshing these every
    /// tick yields the discrete, locally-linear model variant.
    pub fn linearize(&self, state: &State, input: &Input) -> (StateJacobian, InputJacobian) {
        let p = &self.params;
        let (m, g, l) = (p.mass, p.gravity, p.arm_length);

        let (t1, t2, t3, t4) = (input.thrust[0], input.thrust[1], input.thrust[2], input.thrust[3]);
        let (s1, s2, s3, s4) = (
            input.tilt[0].sin(),
            input.tilt[1].sin(),
            input.tilt[2].sin(),
            input.tilt[3].sin(),
        );
        let (c1, c2, c3, c4) = (
            input.tilt[0].cos(),
            input.tilt[1].cos(),
            input.tilt[2].cos(),
            input.tilt[3].cos(),
        );

        let roll = state.roll();
        let pitch = state.pitch();
        let vy = state.velocity.y;
        let (roll_rate, pitch_rate) = (state.rates.x, state.rates.y);

        let mut a = StateJacobian::zeros();
        // Kinematics: d(pos)/dt = vel, d(att)/dt = rates
        for i in 0..6 {
            a[(i, i + 6)] = 1.0;
        }
        // Linear accelerations
        a[(6, 4)] = -g * pitch.cos();
        a[(7, 3)] = -g * roll.cos();
        a[(8, 3)] = g * roll.sin() * pitch.cos();
        a[(8, 4)] = g * roll.cos() * pitch.sin();
        // Angular accelerations (gyroscopic cross terms)
        a[(9, 7)] = (p.iyy - p.izz) * pitch_rate / p.ixx;
        a[(9, 10)] = (p.iyy - p.izz) * vy / p.ixx;
        a[(10, 7)] = -(p.ixx - p.izz) * roll_rate / p.iyy;
        a[(10, 9)] = -(p.ixx - p.izz) * vy / p.iyy;
        a[(11, 9)] = (p.ixx - p.iyy) * pitch_rate / p.izz;
        a[(11, 10)] = (p.ixx - p.iyy) * roll_rate / p.izz;

        let mut b = InputJacobian::zeros();
        // ẍ: rotors 2 and 4 tilt along x
        b[(6, 1)] = s2 / m;
        b[(6, 3)] = -s4 / m;
        b[(6, 5)] = t2 * c2 / m;
        b[(6, 7)] = -t4 * c4 / m;
        // ÿ: rotors 1 and 3 tilt along y
        b[(7, 0)] = s1 / m;
        b[(7, 2)] = -s3 / m;
        b[(7, 4)] = t1 * c1 / m;
        b[(7, 6)] = -t3 * c3 / m;
        // z̈: all four contribute their vertical component
        b[(8, 0)] = c1 / m;
        b[(8, 1)] = c2 / m;
        b[(8, 2)] = c3 / m;
        b[(8, 3)] = c4 / m;
        b[(8, 4)] = -t1 * s1 / m;
        b[(8, 5)] = -t2 * s2 / m;
        b[(8, 6)] = -t3 * s3 / m;
        b[(8, 7)] = -t4 * s4 / m;
        // Roll torque from rotors 2/4
        b[(9, 1)] = l * c2 / p.ixx;
        b[(9, 3)] = -l * c4 / p.ixx;
        b[(9, 5)] = -l * t2 * s2 / p.ixx;
        b[(9, 7)] = l * t4 * s4 / p.ixx;
        // Pitch torque from rotors 1/3
        b[(10, 0)] = l * c1 / p.iyy;
        b[(10, 2)] = -l * c3 / p.iyy;
        b[(10, 4)] = -l * t1 * s1 / p.iyy;
        b[(10, 6)] = l * t3 * s3 / p.iyy;
        // Yaw torque from all tilt components
        b[(11, 0)] = l * s1 / p.izz;
        b[(11, 1)] = l * s2 / p.izz;
        b[(11, 2)] = l * s3 / p.izz;
        b[(11, 3)] = l * s4 / p.izz;
        b[(11, 4)] = l * t1 * c1 / p.izz;
        b[(11, 5)] = l * t2 * c2 / p.izz;
        b[(11, 6)] = l * t3 * c3 / p.izz;
        b[(11, 7)] = l * t4 * c4 / p.izz;

        (a, b)
    }

    /// Affine model about a reference operating point
    ///
    /// Returns (A, B, f₀) such that ẋ ≈ f₀ + A·(x − x₀) + B·(u − u₀),
    /// the form consumed when the optimizer runs the linearized variant.
    pub fn linearize_at(
        &self,
        op: &OperatingPoint,
    ) -> (StateJacobian, InputJacobian, StateVector) {
        let (a, b) = self.linearize(&op.state, &op.input);
        let f0 = self.derivative(&op.state, &op.input);
        (a, b, f0)
    }
}
