//! Outer control loop
//!
//! One tick runs estimate → solve → command. Failures never panic the
//! loop: an infeasible solve is retried once with widened state boxes,
//! and anything still failing holds the previous command (or hover when
//! nothing has been commanded yet). Only a run of consecutive failures
//! long enough to exhaust the configured policy surfaces as an error.

use log::{info, warn};
use nalgebra::Vector4;
use thiserror::Error;
use tiltmpc_core::dynamics::DynamicsModel;
use tiltmpc_core::estimator::{
    EstimatorError, RawSensors, SingularityPolicy, StateEstimator, TiltMeasurement,
};
use tiltmpc_core::state::{Input, OperatingPoint};

use crate::config::{ConfigError, ControlConfig, ServoConfig};
use crate::ocp::{SolveStats, Target};
use crate::optimizer::{HorizonOptimizer, OptimizerError};

/// Control loop failures
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("estimation failed: {0}")]
    Estimator(#[from] EstimatorError),
    #[error("horizon solve failed: {0}")]
    Optimizer(#[from] OptimizerError),
    #[error("held the previous command for {consecutive} consecutive ticks")]
    TooManyFailures { consecutive: usize },
}

/// Per-tick actuator command
///
/// Thrusts are applied directly; tilt targets are tracked by the PD
/// servo whose torques are reported alongside for torque-driven rigs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorCommand {
    /// Per-rotor thrust [N]
    pub thrusts: Vector4<f64>,
    /// Per-rotor tilt setpoint [rad]
    pub tilt_targets: Vector4<f64>,
    /// PD servo torques toward the tilt setpoints
    pub servo_torques: Vector4<f64>,
}

impl ActuatorCommand {
    /// The rotor input this command asks the plant for
    pub fn as_input(&self) -> Input {
        Input {
            thrust: self.thrusts,
            tilt: self.tilt_targets,
        }
    }
}

/// Where the loop is in its tick cycle
///
/// `Idle` only before the first tick; afterwards the loop alternates
/// `Solving` and `Applying` with no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopPhase {
    Idle,
    Solving,
    Applying,
}

/// PD tracker for the tilt servos
#[derive(Debug, Clone, Copy)]
pub struct TiltServo {
    kp: f64,
    kd: f64,
}

impl TiltServo {
    pub fn new(config: &ServoConfig) -> Self {
        Self {
            kp: config.kp,
            kd: config.kd(),
        }
    }

    /// Torque steering a measured tilt toward its setpoint
    pub fn torque(&self, target: f64, measured: &TiltMeasurement) -> f64 {
        self.kp * (target - measured.angle) - self.kd * measured.rate
    }
}

/// Estimate → solve → command, once per tick
pub struct ControlLoop {
    config: ControlConfig,
    model: DynamicsModel,
    estimator: StateEstimator,
    optimizer: HorizonOptimizer,
    servo: TiltServo,
    target: Target,
    phase: LoopPhase,
    last_input: Input,
    last_command: Option<ActuatorCommand>,
    last_stats: Option<SolveStats>,
    consecutive_failures: usize,
}

impl ControlLoop {
    pub fn new(config: ControlConfig, target: Target) -> Result<Self, ControlError> {
        config.validate()?;
        let model = DynamicsModel::new(config.vehicle);
        let optimizer = HorizonOptimizer::new(model.clone(), &config)?;
        let policy = if config.estimator.clamp_on_singularity {
            SingularityPolicy::Clamp
        } else {
            SingularityPolicy::Reject
        };
        let estimator = StateEstimator::new(config.estimator.singularity_threshold, policy);
        let hover = Input::hover(config.vehicle.mass, config.vehicle.gravity);

        Ok(Self {
            servo: TiltServo::new(&config.servo),
            config,
            model,
            estimator,
            optimizer,
            target,
            phase: LoopPhase::Idle,
            last_input: hover,
            last_command: None,
            last_stats: None,
            consecutive_failures: 0,
        })
    }

    /// Change the position reference; the warm start is dropped since it
    /// was optimized for the previous reference.
    pub fn set_target(&mut self, target: Target) {
        self.target = target;
        self.optimizer.reset();
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Diagnostics of the most recent successful solve
    pub fn last_stats(&self) -> Option<&SolveStats> {
        self.last_stats.as_ref()
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Run one control tick on a raw sensor snapshot
    pub fn tick(&mut self, raw: &RawSensors) -> Result<ActuatorCommand, ControlError> {
        self.phase = LoopPhase::Solving;
        let state = match self.estimator.estimate(raw) {
            Ok(state) => state,
            Err(err) => {
                warn!("estimation failed, holding command: {err}");
                return self.hold(raw, err.into());
            }
        };

        let op = OperatingPoint {
            state,
            input: self.last_input,
            acceleration: self.model.acceleration(&state, &self.last_input),
        };

        let solved = match self.optimizer.solve(&state, &self.target, &op) {
            Ok(result) => Ok(result),
            Err(OptimizerError::Infeasible) => {
                info!("horizon infeasible, retrying with widened state boxes");
                self.optimizer.solve_relaxed(&state, &self.target, &op)
            }
            Err(err) => Err(err),
        };

        match solved {
            Ok((trajectory, stats)) => {
                self.consecutive_failures = 0;
                self.last_stats = Some(stats);
                Ok(self.command_from(trajectory.first_input(), raw))
            }
            Err(err) => {
                warn!("horizon solve failed, holding command: {err}");
                self.hold(raw, err.into())
            }
        }
    }

    /// Clamp a planned input to the actuator ceilings and attach servo
    /// torques for the measured tilt states.
    fn command_from(&mut self, planned: Input, raw: &RawSensors) -> ActuatorCommand {
        let (input, violation) =
            planned.clamped(self.config.bounds.thrust_max, self.config.bounds.tilt_max);
        if violation > 1e-6 {
            warn!("planned input exceeded actuator limits by {violation:.3e}");
        }

        let mut servo_torques = Vector4::zeros();
        for i in 0..4 {
            servo_torques[i] = self.servo.torque(input.tilt[i], &raw.tilt[i]);
        }

        let command = ActuatorCommand {
            thrusts: input.thrust,
            tilt_targets: input.tilt,
            servo_torques,
        };
        self.last_input = input;
        self.last_command = Some(command);
        self.phase = LoopPhase::Applying;
        command
    }

    /// Keep flying on the previous command until the failure budget runs out
    fn hold(&mut self, raw: &RawSensors, err: ControlError) -> Result<ActuatorCommand, ControlError> {
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.failure.max_consecutive_failures {
            warn!("failure budget exhausted: {err}");
            return Err(ControlError::TooManyFailures {
                consecutive: self.consecutive_failures,
            });
        }

        let held = match self.last_command {
            Some(command) => command.as_input(),
            None => Input::hover(self.config.vehicle.mass, self.config.vehicle.gravity),
        };
        let mut servo_torques = Vector4::zeros();
        for i in 0..4 {
            servo_torques[i] = self.servo.torque(held.tilt[i], &raw.tilt[i]);
        }
        self.phase = LoopPhase::Applying;
        Ok(ActuatorCommand {
            thrusts: held.thrust,
            tilt_targets: held.tilt,
            servo_torques,
        })
    }
}
