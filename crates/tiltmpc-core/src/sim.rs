//! Plant and sensor interfaces with software-in-the-loop implementations
//!
//! The control loop sees the world through two seams: a [`Plant`] that
//! advances the true dynamics one sample time, and a [`SensorRig`] that
//! synthesizes the raw sensor snapshot for a true state. Both are owned
//! externally; the loop itself never integrates dynamics.

use nalgebra::Vector4;

use crate::dynamics::DynamicsModel;
use crate::estimator::{RawSensors, TiltMeasurement};
use crate::integrator::rk4;
use crate::rotation::rotation_from_euler;
use crate::state::{Input, State};

/// Advances true (or simulated) dynamics by one sample time
pub trait Plant {
    fn step(&self, current: &State, input: &Input, dt: f64) -> State;
}

/// Nonlinear rigid-body plant integrated with RK4
#[derive(Debug, Clone)]
pub struct SimulatedPlant {
    model: DynamicsModel,
}

impl SimulatedPlant {
    pub fn new(model: DynamicsModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &DynamicsModel {
        &self.model
    }
}

impl Plant for SimulatedPlant {
    fn step(&self, current: &State, input: &Input, dt: f64) -> State {
        let x = current.to_vector();
        let next = rk4(&x, dt, |x| {
            self.model.derivative(&State::from_vector(x), input)
        });
        State::from_vector(&next)
    }
}

/// Synthesizes [`RawSensors`] for a true vehicle state.
///
/// Tilt angles track the applied command exactly (ideal servo); tilt
/// rates are finite-differenced across ticks. Roll, pitch and yaw rates
/// come out on three distinct channels.
#[derive(Debug, Clone)]
pub struct SensorRig {
    dt: f64,
    last_tilt: Vector4<f64>,
}

impl SensorRig {
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            last_tilt: Vector4::zeros(),
        }
    }

    pub fn sense(&mut self, state: &State, tilt: &Vector4<f64>) -> RawSensors {
        let rates = (tilt - self.last_tilt) / self.dt;
        self.last_tilt = *tilt;

        let mut measurements = [TiltMeasurement::default(); 4];
        for i in 0..4 {
            measurements[i] = TiltMeasurement {
                angle: tilt[i],
                rate: rates[i],
            };
        }

        RawSensors {
            tilt: measurements,
            position: state.position,
            rotation: rotation_from_euler(state.roll(), state.pitch(), state.yaw()),
            linear_velocity: state.velocity,
            angular_velocity: state.rates,
        }
    }
}
