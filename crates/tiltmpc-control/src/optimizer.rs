//! Receding-horizon optimizer
//!
//! Solves the horizon problem by sequential quadratic programming: each
//! pass linearizes the dynamics about the current trajectory iterate,
//! builds a sparse QP over the stacked state and input corrections and
//! hands it to OSQP. The first interval's input is what the control
//! loop applies; the rest of the trajectory is shifted one interval and
//! kept as the next tick's warm start.
//!
//! Decision vector layout for an N-step horizon:
//!
//! ```text
//! z = [δx₁ .. δx_N, δu₀ .. δu_{N−1}]    (20N variables)
//! ```
//!
//! with the measured state x₀ fixed, so it never appears as a variable.

use std::time::Instant;

use log::{debug, warn};
use osqp::{CscMatrix, Problem, Settings, Status};
use thiserror::Error;
use tiltmpc_core::dynamics::DynamicsModel;
use tiltmpc_core::state::{Input, OperatingPoint, State};

use crate::config::{ControlConfig, HorizonConfig, SolverConfig};
use crate::objective::{Bounds, Objective};
use crate::ocp::{HorizonTrajectory, SolveStats, Target};

/// Horizon solve failures
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// No trajectory satisfies the constraints from the current state
    #[error("horizon problem infeasible from the current state")]
    Infeasible,
    /// The QP backend ran out of iterations
    #[error("solver failed to converge within the iteration limit")]
    Nonconvergence,
    /// NaN or similar numerical breakdown
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
    /// The backend could not be initialized
    #[error("solver setup failed: {0}")]
    Setup(String),
}

/// SQP solver over the horizon
pub struct HorizonOptimizer {
    model: DynamicsModel,
    objective: Objective,
    bounds: Bounds,
    horizon: HorizonConfig,
    solver: SolverConfig,
    warm_start: Option<HorizonTrajectory>,
}

impl HorizonOptimizer {
    /// Build the optimizer and probe the QP backend once.
    ///
    /// The probe solves a trivial one-variable QP so that a broken
    /// backend surfaces as a fatal [`OptimizerError::Setup`] at startup
    /// rather than on the first control tick.
    pub fn new(model: DynamicsModel, config: &ControlConfig) -> Result<Self, OptimizerError> {
        probe_backend()?;
        Ok(Self {
            model,
            objective: Objective::new(config.weights),
            bounds: Bounds::from_config(&config.bounds),
            horizon: config.horizon,
            solver: config.solver,
            warm_start: None,
        })
    }

    pub fn objective(&self) -> &Objective {
        &self.objective
    }

    /// Drop the carried warm start
    pub fn reset(&mut self) {
        self.warm_start = None;
    }

    /// Solve the horizon problem from `current` under the nominal bounds
    pub fn solve(
        &mut self,
        current: &State,
        target: &Target,
        op: &OperatingPoint,
    ) -> Result<(HorizonTrajectory, SolveStats), OptimizerError> {
        let bounds = self.bounds.clone();
        self.solve_with_bounds(current, target, op, &bounds, false)
    }

    /// Retry with state boxes widened by the configured relax factor.
    ///
    /// Used after [`OptimizerError::Infeasible`]: a state already outside
    /// its operational envelope makes the nominal boxes unreachable
    /// within the horizon, so they are widened to let the plan steer
    /// back. Input limits stay physical and are never widened.
    pub fn solve_relaxed(
        &mut self,
        current: &State,
        target: &Target,
        op: &OperatingPoint,
    ) -> Result<(HorizonTrajectory, SolveStats), OptimizerError> {
        let bounds = self.bounds.relaxed(self.solver.relax_factor);
        self.solve_with_bounds(current, target, op, &bounds, true)
    }

    fn solve_with_bounds(
        &mut self,
        current: &State,
        target: &Target,
        op: &OperatingPoint,
        bounds: &Bounds,
        relaxed: bool,
    ) -> Result<(HorizonTrajectory, SolveStats), OptimizerError> {
        let start = Instant::now();
        let mut trajectory = self.initial_guess(current);

        let mut sqp_iterations = 0;
        let mut step_norm = f64::INFINITY;
        while sqp_iterations < self.solver.max_sqp_iterations {
            sqp_iterations += 1;
            let delta = self.solve_qp(&trajectory, target, op, bounds)?;
            step_norm = apply_step(&mut trajectory, &delta);
            if !trajectory.is_finite() {
                return Err(OptimizerError::NumericalFailure(
                    "non-finite trajectory iterate".into(),
                ));
            }
            if step_norm < self.solver.step_tolerance {
                break;
            }
        }

        trajectory.refresh_accelerations(&self.model);
        let objective = self
            .objective
            .trajectory_cost(&trajectory, target, &op.input);
        if !objective.is_finite() {
            return Err(OptimizerError::NumericalFailure(
                "non-finite objective value".into(),
            ));
        }

        debug!(
            "horizon solve: {} passes, objective {:.6}, step {:.2e}, {:?}",
            sqp_iterations,
            objective,
            step_norm,
            start.elapsed()
        );

        self.warm_start = Some(trajectory.shifted());
        let stats = SolveStats {
            sqp_iterations,
            objective,
            step_norm,
            solve_time: start.elapsed(),
            relaxed,
        };
        Ok((trajectory, stats))
    }

    /// Previous solution shifted one interval, or a constant hover guess
    fn initial_guess(&self, current: &State) -> HorizonTrajectory {
        let params = self.model.params();
        let mut trajectory = match &self.warm_start {
            Some(ws) if ws.steps() == self.horizon.steps && ws.dt == self.horizon.dt => ws.clone(),
            _ => HorizonTrajectory::constant(
                *current,
                Input::hover(params.mass, params.gravity),
                self.horizon.steps,
                self.horizon.dt,
            ),
        };
        trajectory.states[0] = *current;
        trajectory
    }

    /// Build and solve one QP about the given iterate.
    ///
    /// Constraint rows, in order: 12N linearized dynamics equalities,
    /// 12N state boxes, 8N input boxes.
    fn solve_qp(
        &self,
        trajectory: &HorizonTrajectory,
        target: &Target,
        op: &OperatingPoint,
        bounds: &Bounds,
    ) -> Result<Vec<f64>, OptimizerError> {
        let n_steps = trajectory.steps();
        let dt = trajectory.dt;
        let nv = 20 * n_steps;
        let nc = 32 * n_steps;

        let xi = |k: usize| (k - 1) * 12;
        let ui = |k: usize| 12 * n_steps + k * 8;

        let mut p = vec![vec![0.0; nv]; nv];
        let mut q = vec![0.0; nv];
        let mut a = vec![vec![0.0; nv]; nc];
        let mut l = vec![0.0; nc];
        let mut u = vec![0.0; nc];

        // Dynamics equalities: δx_{k+1} − Ad·δx_k − Bd·δu_k = d_k with
        // Ad = I + dt·A, Bd = dt·B and defect d_k = x̄_k + dt·f − x̄_{k+1}
        for k in 0..n_steps {
            let xk = &trajectory.states[k];
            let uk = &trajectory.inputs[k];
            let (ja, jb) = self.model.linearize(xk, uk);
            let f = self.model.derivative(xk, uk);
            let d = xk.to_vector() + f * dt - trajectory.states[k + 1].to_vector();

            let row = k * 12;
            for i in 0..12 {
                a[row + i][xi(k + 1) + i] = 1.0;
                l[row + i] = d[i];
                u[row + i] = d[i];
            }
            if k >= 1 {
                for i in 0..12 {
                    for j in 0..12 {
                        let identity = if i == j { 1.0 } else { 0.0 };
                        a[row + i][xi(k) + j] = -(identity + dt * ja[(i, j)]);
                    }
                }
            }
            for i in 0..12 {
                for j in 0..8 {
                    a[row + i][ui(k) + j] = -dt * jb[(i, j)];
                }
            }
        }

        // State boxes on every node past the measured one
        for k in 1..=n_steps {
            let row = 12 * n_steps + (k - 1) * 12;
            let xv = trajectory.states[k].to_vector();
            for i in 0..12 {
                a[row + i][xi(k) + i] = 1.0;
                l[row + i] = bounds.state_lower[i] - xv[i];
                u[row + i] = bounds.state_upper[i] - xv[i];
            }
        }

        // Input boxes
        for k in 0..n_steps {
            let row = 24 * n_steps + k * 8;
            let uv = trajectory.inputs[k].to_vector();
            for i in 0..8 {
                a[row + i][ui(k) + i] = 1.0;
                l[row + i] = bounds.input_lower[i] - uv[i];
                u[row + i] = bounds.input_upper[i] - uv[i];
            }
        }

        let w = *self.objective.weights();

        // Gauss-Newton model of the pseudo-Huber position tracking term
        for k in 1..=n_steps {
            let term = self
                .objective
                .position_term(&trajectory.states[k].position, &target.at_node(k));
            let base = xi(k);
            for i in 0..3 {
                q[base + i] += term.gradient[i];
                for j in 0..3 {
                    p[base + i][base + j] += term.hessian[(i, j)];
                }
            }
        }

        // Gauss-Newton model of the thrust magnitude term
        for k in 0..n_steps {
            let term = self.objective.thrust_term(&trajectory.inputs[k].thrust);
            let base = ui(k);
            for i in 0..4 {
                q[base + i] += term.gradient[i];
                for j in 0..4 {
                    p[base + i][base + j] += term.hessian[(i, j)];
                }
            }
        }

        // Input slew penalty, anchored at the last applied command
        let mut prev = op.input.to_vector();
        for k in 0..n_steps {
            let cur = trajectory.inputs[k].to_vector();
            let delta = cur - prev;
            for i in 0..8 {
                let ri = if i < 4 { w.rate_thrust } else { w.rate_tilt };
                q[ui(k) + i] += 2.0 * ri * delta[i];
                p[ui(k) + i][ui(k) + i] += 2.0 * ri;
                if k >= 1 {
                    q[ui(k - 1) + i] -= 2.0 * ri * delta[i];
                    p[ui(k - 1) + i][ui(k - 1) + i] += 2.0 * ri;
                    p[ui(k) + i][ui(k - 1) + i] -= 2.0 * ri;
                    p[ui(k - 1) + i][ui(k) + i] -= 2.0 * ri;
                }
            }
            prev = cur;
        }

        // Keep the Hessian strictly positive definite
        for (i, row) in p.iter_mut().enumerate() {
            row[i] += 2.0 * self.solver.damping;
        }

        let settings = Settings::default()
            .verbose(false)
            .eps_abs(self.solver.qp_tolerance)
            .eps_rel(self.solver.qp_tolerance)
            .max_iter(self.solver.max_qp_iterations);

        let p_mat = CscMatrix::from(&p).into_upper_tri();
        let a_mat = CscMatrix::from(&a);
        let mut problem = Problem::new(p_mat, &q, a_mat, &l, &u, &settings)
            .map_err(|e| OptimizerError::Setup(format!("{e:?}")))?;

        match problem.solve() {
            Status::Solved(solution) | Status::SolvedInaccurate(solution) => {
                let x = solution.x().to_vec();
                if x.iter().any(|v| !v.is_finite()) {
                    Err(OptimizerError::NumericalFailure(
                        "non-finite QP solution".into(),
                    ))
                } else {
                    Ok(x)
                }
            }
            Status::MaxIterationsReached(_) | Status::TimeLimitReached(_) => {
                warn!("QP hit the iteration limit");
                Err(OptimizerError::Nonconvergence)
            }
            Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => {
                Err(OptimizerError::Infeasible)
            }
            Status::DualInfeasible(_) | Status::DualInfeasibleInaccurate(_) => Err(
                OptimizerError::NumericalFailure("QP dual infeasible".into()),
            ),
            _ => Err(OptimizerError::NumericalFailure(
                "unexpected QP solver status".into(),
            )),
        }
    }
}

/// Add the QP correction onto the iterate; returns the largest component
fn apply_step(trajectory: &mut HorizonTrajectory, delta: &[f64]) -> f64 {
    let n_steps = trajectory.steps();
    let mut worst = 0.0f64;
    for k in 1..=n_steps {
        let base = (k - 1) * 12;
        let mut xv = trajectory.states[k].to_vector();
        for i in 0..12 {
            xv[i] += delta[base + i];
            worst = worst.max(delta[base + i].abs());
        }
        trajectory.states[k] = State::from_vector(&xv);
    }
    for k in 0..n_steps {
        let base = 12 * n_steps + k * 8;
        let mut uv = trajectory.inputs[k].to_vector();
        for i in 0..8 {
            uv[i] += delta[base + i];
            worst = worst.max(delta[base + i].abs());
        }
        trajectory.inputs[k] = Input::from_vector(&uv);
    }
    worst
}

/// One-variable QP solved once at startup to catch a broken backend
fn probe_backend() -> Result<(), OptimizerError> {
    let p = CscMatrix::from(&vec![vec![2.0]]).into_upper_tri();
    let a = CscMatrix::from(&vec![vec![1.0]]);
    let settings = Settings::default().verbose(false);
    let mut problem = Problem::new(p, &[1.0], a, &[-1.0], &[1.0], &settings)
        .map_err(|e| OptimizerError::Setup(format!("{e:?}")))?;
    match problem.solve() {
        Status::Solved(_) | Status::SolvedInaccurate(_) => Ok(()),
        _ => Err(OptimizerError::Setup(
            "backend probe did not reach an optimum".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use tiltmpc_core::dynamics::VehicleParams;

    fn optimizer(config: &ControlConfig) -> HorizonOptimizer {
        HorizonOptimizer::new(DynamicsModel::new(config.vehicle), config).unwrap()
    }

    fn hover_op(config: &ControlConfig) -> OperatingPoint {
        OperatingPoint::hover(config.vehicle.mass, config.vehicle.gravity)
    }

    #[test]
    fn test_backend_probe_passes() {
        probe_backend().unwrap();
    }

    #[test]
    fn test_hover_is_a_fixed_point() {
        let config = ControlConfig::default();
        let mut optimizer = optimizer(&config);
        let op = hover_op(&config);

        let (trajectory, stats) = optimizer
            .solve(&State::zero(), &Target::Fixed(Vector3::zeros()), &op)
            .unwrap();

        let input = trajectory.first_input();
        let lift: f64 = (0..4).map(|i| input.thrust[i] * input.tilt[i].cos()).sum();
        let weight = config.vehicle.mass * config.vehicle.gravity;
        assert_relative_eq!(lift, weight, epsilon = 0.05);
        assert!(input.tilt.amax() < 0.01);
        assert!(!stats.relaxed);
        assert!(stats.objective.is_finite());
    }

    #[test]
    fn test_returned_accelerations_satisfy_residual() {
        let config = ControlConfig::default();
        let mut optimizer = optimizer(&config);
        let op = hover_op(&config);
        let model = DynamicsModel::new(config.vehicle);

        let mut state = State::zero();
        state.position.x = 0.4;
        let (trajectory, _) = optimizer
            .solve(&state, &Target::Fixed(Vector3::zeros()), &op)
            .unwrap();

        let last = trajectory.inputs.len() - 1;
        for (k, node) in trajectory.states.iter().enumerate() {
            let input = &trajectory.inputs[k.min(last)];
            let residual = model.residual(node, input, &trajectory.accelerations[k]);
            assert_relative_eq!(residual.norm(), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_solution_respects_bounds() {
        let config = ControlConfig::default();
        let mut optimizer = optimizer(&config);
        let op = hover_op(&config);

        // A far target saturates something; the plan must stay in its boxes
        let (trajectory, _) = optimizer
            .solve(
                &State::zero(),
                &Target::Fixed(Vector3::new(0.0, 0.0, 5.0)),
                &op,
            )
            .unwrap();

        let tol = 1e-4;
        for input in &trajectory.inputs {
            for i in 0..4 {
                assert!(input.thrust[i] >= -tol);
                assert!(input.thrust[i] <= config.bounds.thrust_max + tol);
                assert!(input.tilt[i].abs() <= config.bounds.tilt_max + tol);
            }
        }
        for state in trajectory.states.iter().skip(1) {
            assert!(state.velocity.amax() <= config.bounds.velocity_max + tol);
            assert!(state.rates.amax() <= config.bounds.rate_max + tol);
        }
    }

    #[test]
    fn test_infeasible_state_is_reported_and_relaxation_recovers() {
        let config = ControlConfig::default();
        let mut optimizer = optimizer(&config);
        let op = hover_op(&config);

        // Falling far faster than the velocity box allows: with dt = 0.02
        // the thrust ceiling cannot pull vz back inside ±5 in one step
        let mut state = State::zero();
        state.velocity.z = -10.0;

        let err = optimizer
            .solve(&state, &Target::Fixed(Vector3::zeros()), &op)
            .unwrap_err();
        assert!(matches!(err, OptimizerError::Infeasible));

        let (_, stats) = optimizer
            .solve_relaxed(&state, &Target::Fixed(Vector3::zeros()), &op)
            .unwrap();
        assert!(stats.relaxed);
    }

    #[test]
    fn test_warm_start_does_not_worsen_objective() {
        let config = ControlConfig::default();
        let op = hover_op(&config);
        let mut state = State::zero();
        state.position.z = -0.5;
        let target = Target::Fixed(Vector3::zeros());

        let mut optimizer = optimizer(&config);
        let (_, cold) = optimizer.solve(&state, &target, &op).unwrap();
        let (_, warm) = optimizer.solve(&state, &target, &op).unwrap();

        assert!(warm.objective <= cold.objective * 1.05 + 1e-6);
    }

    #[test]
    fn test_reset_clears_warm_start() {
        let config = ControlConfig {
            horizon: crate::config::HorizonConfig { steps: 5, dt: 0.02 },
            ..ControlConfig::default()
        };
        let mut optimizer = optimizer(&config);
        let op = hover_op(&config);
        let target = Target::Fixed(Vector3::zeros());

        optimizer.solve(&State::zero(), &target, &op).unwrap();
        assert!(optimizer.warm_start.is_some());
        optimizer.reset();
        assert!(optimizer.warm_start.is_none());
    }

    #[test]
    fn test_heavier_vehicle_plans_more_thrust() {
        let heavy = ControlConfig {
            vehicle: VehicleParams {
                mass: 1.0,
                ..VehicleParams::default()
            },
            ..ControlConfig::default()
        };
        let mut optimizer = optimizer(&heavy);
        let op = hover_op(&heavy);

        let (trajectory, _) = optimizer
            .solve(&State::zero(), &Target::Fixed(Vector3::zeros()), &op)
            .unwrap();
        let input = trajectory.first_input();
        let lift: f64 = (0..4).map(|i| input.thrust[i] * input.tilt[i].cos()).sum();
        assert_relative_eq!(lift, 9.81, epsilon = 0.1);
    }
}
