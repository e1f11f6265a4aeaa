//! Aircraft entity: owns one aircraft's state and integrates its position
//! on a dedicated periodic task.
//!
//! Every mutator and the integration tick serialize through the single
//! per-aircraft lock; everyone else sees value snapshots only.

use atc_core::{AircraftState, AircraftStatus, AirspaceRules, Position, Velocity};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use crate::clock;
use crate::runner::{PeriodicRunner, StopHandle, TaskPriority};

/// Log a full state line every Nth integration tick.
const STATE_LOG_EVERY: u64 = 5;

#[derive(Debug, Error)]
pub enum AircraftError {
    #[error("initial position ({0:.0}, {1:.0}, {2:.0}) outside airspace")]
    OutOfBounds(f64, f64, f64),
}

/// Read-only observer for one aircraft. Cheap to clone; hands out value
/// snapshots taken under the aircraft's lock.
#[derive(Clone)]
pub struct AircraftHandle {
    callsign: String,
    state: Arc<Mutex<AircraftState>>,
}

impl AircraftHandle {
    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn snapshot(&self) -> AircraftState {
        self.state.lock().expect("aircraft lock").clone()
    }
}

/// An aircraft owned by the orchestrator. Dropping the entity stops its
/// update task.
pub struct Aircraft {
    callsign: String,
    state: Arc<Mutex<AircraftState>>,
    rules: AirspaceRules,
    runner: PeriodicRunner,
}

impl Aircraft {
    /// Validate the initial position and build the entity. The update task
    /// is not started until [`Aircraft::start`].
    pub fn new(
        callsign: impl Into<String>,
        position: Position,
        velocity: Velocity,
        rules: AirspaceRules,
        update_period: Duration,
    ) -> Result<Self, AircraftError> {
        if !rules.contains(&position) {
            return Err(AircraftError::OutOfBounds(position.x, position.y, position.z));
        }

        let callsign = callsign.into();
        let mut state = AircraftState::new(callsign.clone(), position, velocity);
        state.timestamp = clock::monotonic_ms();

        tracing::info!(
            callsign = %callsign,
            x = position.x,
            y = position.y,
            z = position.z,
            speed = state.speed(),
            heading = state.heading,
            "aircraft initialized"
        );

        let runner = PeriodicRunner::new(
            format!("aircraft-{callsign}"),
            update_period,
            TaskPriority::Aircraft,
        );

        Ok(Self {
            callsign,
            state: Arc::new(Mutex::new(state)),
            rules,
            runner,
        })
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn handle(&self) -> AircraftHandle {
        AircraftHandle {
            callsign: self.callsign.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn snapshot(&self) -> AircraftState {
        self.state.lock().expect("aircraft lock").clone()
    }

    /// Whether the update task is still alive. Goes false one tick after the
    /// aircraft leaves the airspace.
    pub fn is_active(&self) -> bool {
        self.runner.is_running()
    }

    pub fn runner_stats(&self) -> Arc<crate::runner::ExecStats> {
        self.runner.stats()
    }

    /// Start the periodic integration task. Idempotent.
    pub fn start(&mut self) {
        let state = Arc::clone(&self.state);
        let rules = self.rules.clone();
        let stop = self.runner.stop_handle();
        let period = self.runner.period();
        let mut tick_count: u64 = 0;

        self.runner.start(move || {
            tick_count += 1;
            let dt = period.get().as_secs_f64();
            integrate(&state, &rules, &stop, dt, tick_count);
            Ok(())
        });
    }

    /// Stop the update task, waiting for the in-flight tick.
    pub fn stop(&mut self) {
        self.runner.stop();
    }

    pub fn stop_by(&mut self, deadline: std::time::Instant) -> bool {
        self.runner.stop_by(deadline)
    }

    /// Set ground speed, recomputing the horizontal velocity from the
    /// current heading (0 deg = +x, counter-clockwise). `vz` is preserved.
    /// Returns false and leaves state untouched when out of range.
    pub fn update_speed(&self, speed: f64) -> bool {
        if !self.rules.speed_in_range(speed) {
            tracing::warn!(callsign = %self.callsign, speed, "rejected speed outside limits");
            return false;
        }
        let mut state = self.state.lock().expect("aircraft lock");
        state.velocity = Velocity::from_speed_heading(speed, state.heading, state.velocity.vz);
        state.timestamp = clock::monotonic_ms();
        tracing::info!(callsign = %self.callsign, speed, "speed updated");
        true
    }

    /// Set heading in [0, 360), recomputing horizontal velocity from the
    /// current ground speed (0 deg = +x, counter-clockwise).
    pub fn update_heading(&self, heading_deg: f64) -> bool {
        if !(0.0..360.0).contains(&heading_deg) {
            tracing::warn!(callsign = %self.callsign, heading = heading_deg, "rejected heading outside [0, 360)");
            return false;
        }
        let mut state = self.state.lock().expect("aircraft lock");
        let speed = state.speed();
        state.velocity = Velocity::from_speed_heading(speed, heading_deg, state.velocity.vz);
        state.heading = heading_deg;
        state.timestamp = clock::monotonic_ms();
        tracing::info!(callsign = %self.callsign, heading = heading_deg, "heading updated");
        true
    }

    /// Set altitude instantaneously. No climb-rate model: the assignment is
    /// direct, bounds are the only guard.
    pub fn update_altitude(&self, z: f64) -> bool {
        if !self.rules.altitude_in_range(z) {
            tracing::warn!(callsign = %self.callsign, altitude = z, "rejected altitude outside airspace");
            return false;
        }
        let mut state = self.state.lock().expect("aircraft lock");
        state.position.z = z;
        state.timestamp = clock::monotonic_ms();
        tracing::info!(callsign = %self.callsign, altitude = z, "altitude updated");
        true
    }

    pub fn declare_emergency(&self) {
        let mut state = self.state.lock().expect("aircraft lock");
        state.status = AircraftStatus::Emergency;
        state.alert_level = 3;
        state.timestamp = clock::monotonic_ms();
        tracing::warn!(callsign = %self.callsign, "emergency declared");
    }

    pub fn cancel_emergency(&self) {
        let mut state = self.state.lock().expect("aircraft lock");
        if state.status == AircraftStatus::Emergency {
            state.status = AircraftStatus::Cruising;
            state.alert_level = 0;
            state.timestamp = clock::monotonic_ms();
            tracing::info!(callsign = %self.callsign, "emergency cancelled");
        }
    }

    /// Place the aircraft in or out of a holding pattern.
    pub fn set_holding(&self, holding: bool) {
        let mut state = self.state.lock().expect("aircraft lock");
        match (holding, state.status) {
            (true, AircraftStatus::Cruising) => state.status = AircraftStatus::Holding,
            (false, AircraftStatus::Holding) => state.status = AircraftStatus::Cruising,
            _ => return,
        }
        state.timestamp = clock::monotonic_ms();
    }

    /// Record the highest warning band the aircraft is currently part of.
    /// An aircraft in emergency keeps its maximum level.
    pub fn set_alert_level(&self, level: u8) {
        let mut state = self.state.lock().expect("aircraft lock");
        if state.status == AircraftStatus::Emergency {
            return;
        }
        if state.alert_level != level {
            state.alert_level = level;
            state.timestamp = clock::monotonic_ms();
        }
    }
}

/// One integration step. Commits `position + velocity * dt` while it stays
/// inside the airspace; the first out-of-bounds step marks the aircraft
/// Exiting without moving it, and the tick after that stops the runner.
fn integrate(
    state: &Mutex<AircraftState>,
    rules: &AirspaceRules,
    stop: &StopHandle,
    dt: f64,
    tick_count: u64,
) {
    let mut state = state.lock().expect("aircraft lock");

    if state.status == AircraftStatus::Exiting {
        tracing::info!(callsign = %state.callsign, "exit confirmed, stopping update task");
        stop.request_stop();
        return;
    }

    let new_pos = Position {
        x: state.position.x + state.velocity.vx * dt,
        y: state.position.y + state.velocity.vy * dt,
        z: state.position.z + state.velocity.vz * dt,
    };

    if rules.contains(&new_pos) {
        state.position = new_pos;
        state.timestamp = clock::monotonic_ms();
        if state.status == AircraftStatus::Entering {
            state.status = AircraftStatus::Cruising;
            tracing::info!(callsign = %state.callsign, "established in airspace, now cruising");
        }
        if tick_count % STATE_LOG_EVERY == 0 {
            tracing::debug!(
                callsign = %state.callsign,
                x = state.position.x,
                y = state.position.y,
                z = state.position.z,
                speed = state.speed(),
                heading = state.heading,
                status = %state.status,
                "position update"
            );
        }
    } else {
        state.status = AircraftStatus::Exiting;
        state.timestamp = clock::monotonic_ms();
        tracing::info!(
            callsign = %state.callsign,
            x = new_pos.x,
            y = new_pos.y,
            z = new_pos.z,
            "leaving airspace"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AirspaceRules {
        AirspaceRules::default()
    }

    fn aircraft(pos: (f64, f64, f64), vel: (f64, f64, f64)) -> Aircraft {
        Aircraft::new(
            "AC001",
            Position::new(pos.0, pos.1, pos.2),
            Velocity::new(vel.0, vel.1, vel.2),
            rules(),
            Duration::from_secs(1),
        )
        .expect("in bounds")
    }

    #[test]
    fn rejects_out_of_bounds_spawn() {
        let result = Aircraft::new(
            "AC001",
            Position::new(-10.0, 0.0, 20_000.0),
            Velocity::new(200.0, 0.0, 0.0),
            rules(),
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(AircraftError::OutOfBounds(..))));
    }

    #[test]
    fn speed_round_trips_through_snapshot() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        assert!(ac.update_speed(250.0));
        let snap = ac.snapshot();
        assert!((snap.speed() - 250.0).abs() < 1e-9);
        // heading preserved
        assert!((snap.heading - 0.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_speed_outside_limits() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        let before = ac.snapshot();
        assert!(!ac.update_speed(149.9));
        assert!(!ac.update_speed(500.1));
        let after = ac.snapshot();
        assert_eq!(before.velocity, after.velocity);
        assert_eq!(before.timestamp, after.timestamp);
    }

    #[test]
    fn heading_round_trips_and_preserves_speed() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        assert!(ac.update_heading(90.0));
        let snap = ac.snapshot();
        assert!((snap.heading - 90.0).abs() < 1e-9);
        assert!((snap.speed() - 300.0).abs() < 1e-9);
        assert!(snap.velocity.vx.abs() < 1e-9);
        assert!((snap.velocity.vy - 300.0).abs() < 1e-9);

        assert!(!ac.update_heading(360.0));
        assert!(!ac.update_heading(-0.1));
    }

    #[test]
    fn altitude_is_instantaneous_and_bounded() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        assert!(ac.update_altitude(22_500.0));
        assert_eq!(ac.snapshot().position.z, 22_500.0);
        assert!(!ac.update_altitude(25_000.1));
        assert!(!ac.update_altitude(14_999.9));
        assert_eq!(ac.snapshot().position.z, 22_500.0);
    }

    #[test]
    fn emergency_round_trip_ends_cruising() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        ac.declare_emergency();
        assert_eq!(ac.snapshot().status, AircraftStatus::Emergency);
        ac.cancel_emergency();
        assert_eq!(ac.snapshot().status, AircraftStatus::Cruising);
    }

    #[test]
    fn integration_moves_aircraft_and_promotes_entering() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, -100.0, 0.0));
        let state = Arc::clone(&ac.state);
        let stop = ac.runner.stop_handle();

        integrate(&state, &rules(), &stop, 1.0, 1);
        let snap = ac.snapshot();
        assert_eq!(snap.position, Position::new(50_300.0, 49_900.0, 20_000.0));
        assert_eq!(snap.status, AircraftStatus::Cruising);
        assert!(!stop.stop_requested());
    }

    #[test]
    fn boundary_exit_marks_then_stops() {
        let ac = aircraft((99_500.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let state = Arc::clone(&ac.state);
        let stop = ac.runner.stop_handle();

        // t=1: 99900, still inside
        integrate(&state, &rules(), &stop, 1.0, 1);
        assert_eq!(ac.snapshot().status, AircraftStatus::Cruising);

        // t=2: 100300 would leave; mark Exiting, do not move
        integrate(&state, &rules(), &stop, 1.0, 2);
        let snap = ac.snapshot();
        assert_eq!(snap.status, AircraftStatus::Exiting);
        assert_eq!(snap.position.x, 99_900.0);
        assert!(!stop.stop_requested());

        // t=3: confirming tick requests the stop, position unchanged
        integrate(&state, &rules(), &stop, 1.0, 3);
        assert!(stop.stop_requested());
        assert_eq!(ac.snapshot().position.x, 99_900.0);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let ac = aircraft((50_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        let mut last = ac.snapshot().timestamp;
        for _ in 0..5 {
            ac.update_heading(45.0);
            let ts = ac.snapshot().timestamp;
            assert!(ts >= last);
            last = ts;
        }
    }

    #[test]
    fn running_aircraft_stops_after_leaving_airspace() {
        // 300 units per 10ms tick: off the edge on the second tick
        let mut ac = Aircraft::new(
            "AC001",
            Position::new(99_500.0, 50_000.0, 20_000.0),
            Velocity::new(30_000.0, 0.0, 0.0),
            rules(),
            Duration::from_millis(10),
        )
        .unwrap();
        ac.start();

        // inside -> exiting -> confirmed within a few 10ms ticks
        std::thread::sleep(Duration::from_millis(300));
        assert!(!ac.is_active());
        assert_eq!(ac.snapshot().status, AircraftStatus::Exiting);
        ac.stop();
    }
}
