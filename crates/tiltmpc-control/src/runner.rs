//! Closed-loop runner
//!
//! Wires a [`ControlLoop`] to a [`Plant`] and a [`SensorRig`], stepping
//! sense → control → actuate in lockstep and recording the trace.

use nalgebra::Vector3;
use tiltmpc_core::sim::{Plant, SensorRig};
use tiltmpc_core::state::{Input, State};

use crate::control_loop::{ActuatorCommand, ControlError, ControlLoop};
use crate::ocp::SolveStats;

/// One tick of a closed-loop run
#[derive(Debug, Clone, Copy)]
pub struct RunRecord {
    /// Simulation time at the start of the tick [s]
    pub time: f64,
    /// True plant state before the command was applied
    pub state: State,
    /// Command applied over the tick
    pub command: ActuatorCommand,
    /// Diagnostics of the most recent solve
    pub stats: Option<SolveStats>,
}

/// Recorded trace of a closed-loop run
#[derive(Debug, Clone, Default)]
pub struct RunHistory {
    pub records: Vec<RunRecord>,
}

impl RunHistory {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn final_state(&self) -> Option<&State> {
        self.records.last().map(|r| &r.state)
    }

    /// Largest position error against a fixed setpoint over the last
    /// `tail` ticks, useful for convergence assertions.
    pub fn tail_position_error(&self, target: &Vector3<f64>, tail: usize) -> f64 {
        self.records
            .iter()
            .rev()
            .take(tail)
            .map(|r| (r.state.position - target).norm())
            .fold(0.0, f64::max)
    }
}

/// Controller, sensors and plant stepped in lockstep
pub struct ClosedLoop<P: Plant> {
    controller: ControlLoop,
    plant: P,
    sensors: SensorRig,
    state: State,
    last_input: Input,
    dt: f64,
    time: f64,
}

impl<P: Plant> ClosedLoop<P> {
    pub fn new(controller: ControlLoop, plant: P, initial: State, dt: f64) -> Self {
        Self {
            controller,
            plant,
            sensors: SensorRig::new(dt),
            state: initial,
            last_input: Input::zero(),
            dt,
            time: 0.0,
        }
    }

    pub fn controller(&self) -> &ControlLoop {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ControlLoop {
        &mut self.controller
    }

    /// Current true plant state
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Run one sense → control → actuate step
    pub fn step(&mut self) -> Result<RunRecord, ControlError> {
        let raw = self.sensors.sense(&self.state, &self.last_input.tilt);
        let command = self.controller.tick(&raw)?;
        let record = RunRecord {
            time: self.time,
            state: self.state,
            command,
            stats: self.controller.last_stats().copied(),
        };

        let input = command.as_input();
        self.state = self.plant.step(&self.state, &input, self.dt);
        self.last_input = input;
        self.time += self.dt;
        Ok(record)
    }

    /// Step `ticks` times, collecting the trace
    pub fn run(&mut self, ticks: usize) -> Result<RunHistory, ControlError> {
        let mut history = RunHistory::default();
        for _ in 0..ticks {
            history.records.push(self.step()?);
        }
        Ok(history)
    }
}
