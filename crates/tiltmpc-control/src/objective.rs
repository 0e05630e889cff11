//! Objective terms and operating limits
//!
//! The tracking objective is a pseudo-Huber penalty on position error,
//! a pseudo-Huber penalty on total thrust magnitude and a quadratic
//! slew penalty on input changes between consecutive intervals. All
//! three are smooth, so the optimizer can take Gauss-Newton steps.

use nalgebra::{SMatrix, SVector, Vector3, Vector4};
use tiltmpc_core::state::{Input, InputVector, StateVector};

use crate::config::{BoundsConfig, WeightConfig};
use crate::ocp::{HorizonTrajectory, Target};

/// Smoothed distance: sqrt(‖r‖² + ε²) − ε
///
/// Behaves like ‖r‖²/2ε near zero and like ‖r‖ for large errors, so
/// far-away targets do not produce huge quadratic gradients.
pub fn pseudo_huber(norm_sq: f64, eps: f64) -> f64 {
    (norm_sq + eps * eps).sqrt() - eps
}

/// Box limits on states and inputs over the horizon
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub state_lower: StateVector,
    pub state_upper: StateVector,
    pub input_lower: InputVector,
    pub input_upper: InputVector,
}

impl Bounds {
    pub fn from_config(config: &BoundsConfig) -> Self {
        let mut state_lower = StateVector::from_element(f64::NEG_INFINITY);
        let mut state_upper = StateVector::from_element(f64::INFINITY);
        // Position is unbounded; attitude, velocity and rates are boxed
        for i in 3..6 {
            state_lower[i] = -config.angle_max;
            state_upper[i] = config.angle_max;
        }
        for i in 6..9 {
            state_lower[i] = -config.velocity_max;
            state_upper[i] = config.velocity_max;
        }
        for i in 9..12 {
            state_lower[i] = -config.rate_max;
            state_upper[i] = config.rate_max;
        }

        let mut input_lower = InputVector::zeros();
        let mut input_upper = InputVector::zeros();
        for i in 0..4 {
            input_lower[i] = 0.0;
            input_upper[i] = config.thrust_max;
            input_lower[i + 4] = -config.tilt_max;
            input_upper[i + 4] = config.tilt_max;
        }

        Self {
            state_lower,
            state_upper,
            input_lower,
            input_upper,
        }
    }

    /// Widen the state boxes by `factor`, leaving input limits alone.
    ///
    /// Input limits are physical actuator ceilings and are never relaxed;
    /// state boxes are operational envelopes that may be exceeded to
    /// recover from a state that already violates them.
    pub fn relaxed(&self, factor: f64) -> Self {
        let mut out = self.clone();
        for i in 0..12 {
            if out.state_lower[i].is_finite() {
                out.state_lower[i] *= factor;
            }
            if out.state_upper[i].is_finite() {
                out.state_upper[i] *= factor;
            }
        }
        out
    }
}

/// Value, gradient and Gauss-Newton Hessian of one smooth cost term
#[derive(Debug, Clone, Copy)]
pub struct GaussNewtonTerm<const N: usize> {
    pub value: f64,
    pub gradient: SVector<f64, N>,
    pub hessian: SMatrix<f64, N, N>,
}

/// Gauss-Newton model of w·(sqrt(‖r‖² + ε²) − ε) at residual `r`
fn huber_term<const N: usize>(r: &SVector<f64, N>, weight: f64, eps: f64) -> GaussNewtonTerm<N> {
    let s = (r.norm_squared() + eps * eps).sqrt();
    GaussNewtonTerm {
        value: weight * (s - eps),
        gradient: r * (weight / s),
        hessian: (SMatrix::identity() / s - r * r.transpose() / (s * s * s)) * weight,
    }
}

/// Objective evaluation over a full horizon iterate
#[derive(Debug, Clone, Copy)]
pub struct Objective {
    weights: WeightConfig,
}

impl Objective {
    pub fn new(weights: WeightConfig) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &WeightConfig {
        &self.weights
    }

    /// Position tracking cost at one horizon node
    pub fn position_cost(&self, position: &Vector3<f64>, target: &Vector3<f64>) -> f64 {
        self.position_term(position, target).value
    }

    /// Thrust magnitude cost at one horizon node
    pub fn thrust_cost(&self, thrust: &Vector4<f64>) -> f64 {
        self.thrust_term(thrust).value
    }

    /// Gauss-Newton model of the position term, for the QP builder
    pub fn position_term(
        &self,
        position: &Vector3<f64>,
        target: &Vector3<f64>,
    ) -> GaussNewtonTerm<3> {
        huber_term(
            &(position - target),
            self.weights.position,
            self.weights.huber_eps,
        )
    }

    /// Gauss-Newton model of the thrust term, for the QP builder
    pub fn thrust_term(&self, thrust: &Vector4<f64>) -> GaussNewtonTerm<4> {
        huber_term(thrust, self.weights.thrust, self.weights.huber_eps)
    }

    /// Slew cost between two consecutive inputs
    pub fn slew_cost(&self, input: &Input, previous: &Input) -> f64 {
        let dt = input.thrust - previous.thrust;
        let da = input.tilt - previous.tilt;
        self.weights.rate_thrust * dt.norm_squared() + self.weights.rate_tilt * da.norm_squared()
    }

    /// Total nonlinear objective of a trajectory iterate
    ///
    /// `previous_input` anchors the slew penalty of the first interval
    /// to the command applied on the last tick.
    pub fn trajectory_cost(
        &self,
        trajectory: &HorizonTrajectory,
        target: &Target,
        previous_input: &Input,
    ) -> f64 {
        let mut cost = 0.0;
        for (k, state) in trajectory.states.iter().enumerate().skip(1) {
            cost += self.position_cost(&state.position, &target.at_node(k));
        }
        let mut prev = *previous_input;
        for input in &trajectory.inputs {
            cost += self.thrust_cost(&input.thrust);
            cost += self.slew_cost(input, &prev);
            prev = *input;
        }
        cost
    }
}
