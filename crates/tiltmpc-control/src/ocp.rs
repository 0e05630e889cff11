//! Horizon problem data: targets, trajectory iterates and solve stats

use std::time::Duration;

use nalgebra::Vector3;
use tiltmpc_core::dynamics::DynamicsModel;
use tiltmpc_core::state::{Acceleration, Input, State};

/// Position reference over the horizon
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// Same setpoint at every node
    Fixed(Vector3<f64>),
    /// Per-node samples; the last sample extends past the end
    Sampled(Vec<Vector3<f64>>),
}

impl Target {
    /// Reference position at horizon node `k` (k = 1..=N)
    pub fn at_node(&self, k: usize) -> Vector3<f64> {
        match self {
            Target::Fixed(p) => *p,
            Target::Sampled(samples) => match samples.last() {
                Some(last) => *samples.get(k.saturating_sub(1)).unwrap_or(last),
                None => Vector3::zeros(),
            },
        }
    }
}

/// One trajectory iterate over the horizon
///
/// `states` and `accelerations` hold N+1 nodes (the first is the
/// measured state), `inputs` holds N intervals. Accelerations are
/// algebraic variables: a finished solve keeps them consistent with the
/// dynamics at every node. Doubles as the warm start carried between
/// ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizonTrajectory {
    pub dt: f64,
    pub states: Vec<State>,
    pub inputs: Vec<Input>,
    pub accelerations: Vec<Acceleration>,
}

impl HorizonTrajectory {
    /// Constant-state, constant-input initial guess
    pub fn constant(state: State, input: Input, steps: usize, dt: f64) -> Self {
        Self {
            dt,
            states: vec![state; steps + 1],
            inputs: vec![input; steps],
            accelerations: vec![Acceleration::zero(); steps + 1],
        }
    }

    /// Number of control intervals
    pub fn steps(&self) -> usize {
        self.inputs.len()
    }

    /// Time offset of node `k` from the start of the horizon
    pub fn time_at(&self, k: usize) -> f64 {
        k as f64 * self.dt
    }

    /// Input applied over the first interval
    pub fn first_input(&self) -> Input {
        self.inputs[0]
    }

    /// Recompute the algebraic accelerations from the dynamics so the
    /// residual is zero at every node. The terminal node reuses the last
    /// interval's input.
    pub fn refresh_accelerations(&mut self, model: &DynamicsModel) {
        let last = self.inputs.len() - 1;
        for (k, state) in self.states.iter().enumerate() {
            let input = &self.inputs[k.min(last)];
            self.accelerations[k] = model.acceleration(state, input);
        }
    }

    /// Shift one interval forward, duplicating the terminal node.
    ///
    /// The standard receding-horizon warm start: what was planned for
    /// t+dt becomes the guess for t.
    pub fn shifted(&self) -> Self {
        fn shift<T: Copy>(items: &[T]) -> Vec<T> {
            let mut out = items[1..].to_vec();
            if let Some(last) = out.last().copied() {
                out.push(last);
            }
            out
        }
        Self {
            dt: self.dt,
            states: shift(&self.states),
            inputs: shift(&self.inputs),
            accelerations: shift(&self.accelerations),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.states.iter().all(|s| s.is_finite()) && self.inputs.iter().all(|u| u.is_finite())
    }
}

/// Diagnostics for one horizon solve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveStats {
    /// Outer linearize-solve-update passes taken
    pub sqp_iterations: usize,
    /// Nonlinear objective of the returned trajectory
    pub objective: f64,
    /// Largest component of the final correction step
    pub step_norm: f64,
    /// Wall-clock time of the whole solve
    pub solve_time: Duration,
    /// Whether the solution used widened state boxes
    pub relaxed: bool,
}
