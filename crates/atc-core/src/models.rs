//! Core data models for the ATC simulator.

use serde::{Deserialize, Serialize};

/// A point in airspace coordinates. Distance units are uniform across all
/// three axes; `z` is altitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Horizontal (xy-plane) distance to another position.
    pub fn horizontal_distance(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Absolute altitude difference to another position.
    pub fn vertical_distance(&self, other: &Position) -> f64 {
        (self.z - other.z).abs()
    }

    /// Midpoint between two positions.
    pub fn midpoint(&self, other: &Position) -> Position {
        Position {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
        }
    }
}

/// Velocity in distance units per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

impl Velocity {
    pub fn new(vx: f64, vy: f64, vz: f64) -> Self {
        Self { vx, vy, vz }
    }

    /// Horizontal ground speed. Aircraft speed limits apply to this value,
    /// not the 3D magnitude.
    pub fn ground_speed(&self) -> f64 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }

    /// Build a velocity from ground speed and heading, preserving `vz`.
    ///
    /// Heading convention: 0 degrees points along +x and the angle grows
    /// counter-clockwise, so `vx = s*cos(h)`, `vy = s*sin(h)`.
    pub fn from_speed_heading(speed: f64, heading_deg: f64, vz: f64) -> Self {
        let h = heading_deg.to_radians();
        Self {
            vx: speed * h.cos(),
            vy: speed * h.sin(),
            vz,
        }
    }

    /// Heading derived from the horizontal velocity components, in
    /// [0, 360). Uses the same convention as [`Velocity::from_speed_heading`]:
    /// 0 degrees = +x axis, counter-clockwise positive.
    pub fn heading_deg(&self) -> f64 {
        let mut h = self.vy.atan2(self.vx).to_degrees();
        if h < 0.0 {
            h += 360.0;
        }
        // atan2 can round to exactly 360.0 for tiny negative vy
        if h >= 360.0 {
            h -= 360.0;
        }
        h
    }
}

/// Lifecycle status of an aircraft inside the managed airspace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AircraftStatus {
    /// Just entered the airspace
    #[default]
    Entering,
    /// Normal flight
    Cruising,
    /// Maintaining position on controller instruction
    Holding,
    /// Leaving or has left the airspace
    Exiting,
    /// Emergency declared
    Emergency,
}

impl AircraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AircraftStatus::Entering => "ENTERING",
            AircraftStatus::Cruising => "CRUISING",
            AircraftStatus::Holding => "HOLDING",
            AircraftStatus::Exiting => "EXITING",
            AircraftStatus::Emergency => "EMERGENCY",
        }
    }
}

impl std::fmt::Display for AircraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The canonical per-aircraft record. Snapshots of this struct are the only
/// way aircraft state crosses a thread boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftState {
    pub callsign: String,
    pub position: Position,
    pub velocity: Velocity,
    /// Degrees in [0, 360); 0 = +x axis, counter-clockwise positive.
    pub heading: f64,
    pub status: AircraftStatus,
    /// Monotonic milliseconds at last mutation.
    pub timestamp: u64,
    /// 0 = none, 1 = early, 2 = medium, 3 = critical/violation.
    pub alert_level: u8,
}

impl AircraftState {
    pub fn new(callsign: impl Into<String>, position: Position, velocity: Velocity) -> Self {
        Self {
            callsign: callsign.into(),
            position,
            velocity,
            heading: velocity.heading_deg(),
            status: AircraftStatus::Entering,
            timestamp: 0,
            alert_level: 0,
        }
    }

    /// Current horizontal ground speed.
    pub fn speed(&self) -> f64 {
        self.velocity.ground_speed()
    }

    /// Recompute the stored heading from the current velocity vector.
    /// Heading convention: 0 = +x, counter-clockwise (see [`Velocity`]).
    pub fn refresh_heading(&mut self) {
        self.heading = self.velocity.heading_deg();
    }
}

/// A fused radar track, distinct from aircraft ground truth. Positions held
/// here carry the scan jitter applied when the return was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadarTrack {
    pub state: AircraftState,
    /// Monotonic milliseconds of the last accepted scan.
    pub last_update: u64,
    /// Confidence 0-100: +10 per accepted scan, -5 per second of silence.
    pub quality: i32,
    pub transponder_ok: bool,
}

impl RadarTrack {
    pub fn new(state: AircraftState, now_ms: u64) -> Self {
        Self {
            state,
            last_update: now_ms,
            quality: 0,
            transponder_ok: true,
        }
    }

    /// Track age in milliseconds at `now_ms`.
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_round_trips_through_velocity() {
        for h in [0.0, 45.0, 90.0, 179.5, 270.0, 359.0] {
            let v = Velocity::from_speed_heading(300.0, h, 0.0);
            assert!(
                (v.heading_deg() - h).abs() < 1e-9,
                "heading {} came back as {}",
                h,
                v.heading_deg()
            );
            assert!((v.ground_speed() - 300.0).abs() < 1e-9);
        }
    }

    #[test]
    fn heading_wraps_into_range() {
        // Due south-west of the +x axis: atan2 is negative, wrap adds 360
        let v = Velocity::new(100.0, -100.0, 0.0);
        let h = v.heading_deg();
        assert!((0.0..360.0).contains(&h));
        assert!((h - 315.0).abs() < 1e-9);
    }

    #[test]
    fn ground_speed_ignores_vertical_component() {
        let v = Velocity::new(300.0, 400.0, 50.0);
        assert!((v.ground_speed() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn horizontal_and_vertical_distance() {
        let a = Position::new(0.0, 0.0, 20000.0);
        let b = Position::new(3000.0, 4000.0, 21500.0);
        assert!((a.horizontal_distance(&b) - 5000.0).abs() < 1e-9);
        assert!((a.vertical_distance(&b) - 1500.0).abs() < 1e-9);
    }
}
