//! Closed-loop runs of the controller against the simulated plant

use approx::assert_relative_eq;
use nalgebra::Vector3;
use tiltmpc_control::config::{BoundsConfig, ControlConfig, HorizonConfig};
use tiltmpc_control::{ClosedLoop, ControlLoop, Target};
use tiltmpc_core::dynamics::DynamicsModel;
use tiltmpc_core::sim::SimulatedPlant;
use tiltmpc_core::state::State;

fn closed_loop(
    config: ControlConfig,
    target: Vector3<f64>,
    initial: State,
) -> ClosedLoop<SimulatedPlant> {
    let controller = ControlLoop::new(config, Target::Fixed(target)).unwrap();
    let plant = SimulatedPlant::new(DynamicsModel::new(config.vehicle));
    ClosedLoop::new(controller, plant, initial, config.horizon.dt)
}

/// A longer, slower horizon for point-to-point moves
fn travel_config() -> ControlConfig {
    ControlConfig {
        horizon: HorizonConfig { steps: 20, dt: 0.05 },
        bounds: BoundsConfig {
            velocity_max: 1.0,
            ..BoundsConfig::default()
        },
        ..ControlConfig::default()
    }
}

#[test]
fn test_hover_holds_position() {
    let config = ControlConfig::default();
    let mut sim = closed_loop(config, Vector3::zeros(), State::zero());

    let history = sim.run(100).unwrap();
    assert_eq!(history.len(), 100);
    assert!(history.tail_position_error(&Vector3::zeros(), 50) < 0.05);
}

#[test]
fn test_commands_stay_within_limits() {
    let config = travel_config();
    let mut sim = closed_loop(config, Vector3::new(1.0, -1.0, 2.0), State::zero());

    let history = sim.run(100).unwrap();
    for record in &history.records {
        for i in 0..4 {
            assert!(record.command.thrusts[i] >= 0.0);
            assert!(record.command.thrusts[i] <= config.bounds.thrust_max);
            assert!(record.command.tilt_targets[i].abs() <= config.bounds.tilt_max);
        }
    }
}

#[test]
fn test_climb_to_setpoint() {
    let target = Vector3::new(0.0, 0.0, 1.0);
    let mut sim = closed_loop(travel_config(), target, State::zero());

    let history = sim.run(200).unwrap();
    let final_error = (history.final_state().unwrap().position - target).norm();
    assert!(
        final_error < 0.3,
        "closed loop did not converge, final error {final_error}"
    );
    // No overshoot past physical plausibility along the way
    for record in &history.records {
        assert!(record.state.position.norm() < 5.0);
        assert!(record.state.is_finite());
    }
}

#[test]
fn test_lateral_setpoint_uses_tilt() {
    let target = Vector3::new(1.0, 0.0, 0.0);
    let mut sim = closed_loop(travel_config(), target, State::zero());

    let history = sim.run(60).unwrap();
    // Reaching +x requires tilting rotors 2/4; some tick must command it
    let tilted = history
        .records
        .iter()
        .any(|r| r.command.tilt_targets.amax() > 1e-3);
    assert!(tilted);

    let early = (history.records[5].state.position - target).norm();
    let late = (history.final_state().unwrap().position - target).norm();
    assert!(late < early);
}

#[test]
fn test_recovers_from_excessive_descent_rate() {
    let config = ControlConfig::default();
    let mut initial = State::zero();
    initial.velocity.z = -10.0;
    let mut sim = closed_loop(config, Vector3::zeros(), initial);

    // First tick is infeasible under the nominal velocity box; the loop
    // must relax, keep flying and eventually arrest the descent
    let history = sim.run(150).unwrap();
    assert!(history.records[0].stats.unwrap().relaxed);
    assert!(sim.state().velocity.z > -1.0);
}

#[test]
fn test_retarget_mid_run() {
    let first = Vector3::new(0.0, 0.0, 0.5);
    let second = Vector3::new(0.0, 0.5, 0.5);
    let mut sim = closed_loop(travel_config(), first, State::zero());

    sim.run(120).unwrap();
    sim.controller_mut().set_target(Target::Fixed(second));
    let history = sim.run(160).unwrap();

    let final_error = (history.final_state().unwrap().position - second).norm();
    assert!(
        final_error < 0.3,
        "did not reach the second target, error {final_error}"
    );
}

#[test]
fn test_solve_stats_are_recorded() {
    let mut sim = closed_loop(ControlConfig::default(), Vector3::zeros(), State::zero());
    let history = sim.run(3).unwrap();

    let stats = history.records[0].stats.unwrap();
    assert!(stats.sqp_iterations >= 1);
    assert!(stats.objective.is_finite());
    assert!(!stats.relaxed);
    assert_relative_eq!(history.records[0].time, 0.0);
    assert_relative_eq!(history.records[1].time, 0.02, epsilon = 1e-12);
}
