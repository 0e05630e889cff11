//! # tiltmpc-control
//!
//! Receding-horizon position controller for a tilt-rotor quadrotor.
//!
//! Every control tick linearizes the rigid-body dynamics about the
//! current trajectory iterate, solves a sparse QP over the horizon with
//! OSQP and applies the first interval's input. The remainder of the
//! plan warm-starts the next tick.
//!
//! ## Modules
//!
//! - [`config`]: tuning knobs, TOML-loadable with validated defaults
//! - [`objective`]: pseudo-Huber tracking terms and operating limits
//! - [`ocp`]: targets, trajectory iterates and solve diagnostics
//! - [`optimizer`]: the SQP solver over the horizon
//! - [`control_loop`]: estimate → solve → command with failure holding
//! - [`runner`]: closed-loop stepping against a plant

pub mod config;
pub mod control_loop;
pub mod objective;
pub mod ocp;
pub mod optimizer;
pub mod runner;

pub use config::{ConfigError, ControlConfig};
pub use control_loop::{ActuatorCommand, ControlError, ControlLoop, LoopPhase, TiltServo};
pub use objective::{Bounds, Objective};
pub use ocp::{HorizonTrajectory, SolveStats, Target};
pub use optimizer::{HorizonOptimizer, OptimizerError};
pub use runner::{ClosedLoop, RunHistory, RunRecord};
