//! Fly the simulated vehicle to a setpoint and print the trace.
//!
//! ```sh
//! RUST_LOG=debug cargo run --example hover_demo
//! ```

use nalgebra::Vector3;
use tiltmpc_control::config::{BoundsConfig, ControlConfig, HorizonConfig};
use tiltmpc_control::{ClosedLoop, ControlLoop, Target};
use tiltmpc_core::dynamics::DynamicsModel;
use tiltmpc_core::sim::SimulatedPlant;
use tiltmpc_core::state::State;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ControlConfig {
        horizon: HorizonConfig { steps: 20, dt: 0.05 },
        bounds: BoundsConfig {
            velocity_max: 1.0,
            ..BoundsConfig::default()
        },
        ..ControlConfig::default()
    };
    let target = Vector3::new(0.3, 0.3, 1.0);

    let controller = ControlLoop::new(config, Target::Fixed(target))?;
    let plant = SimulatedPlant::new(DynamicsModel::new(config.vehicle));
    let mut sim = ClosedLoop::new(controller, plant, State::zero(), config.horizon.dt);

    let history = sim.run(200)?;
    for record in history.records.iter().step_by(10) {
        let p = record.state.position;
        println!(
            "t = {:5.2} s  position = ({:+.3}, {:+.3}, {:+.3})  error = {:.3} m",
            record.time,
            p.x,
            p.y,
            p.z,
            (p - target).norm()
        );
    }

    let final_error = (sim.state().position - target).norm();
    println!("final error after 10 s: {final_error:.4} m");
    Ok(())
}
