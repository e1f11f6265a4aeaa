//! Scenario file loading.
//!
//! Scenarios are CSV (UTF-8) with the exact header
//! `Time,ID,X,Y,Z,SpeedX,SpeedY,SpeedZ`, one aircraft per row. Bad rows are
//! rejected individually; the loader keeps going and reports both sides.

use crate::models::{Position, Velocity};
use crate::rules::AirspaceRules;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

pub const SCENARIO_HEADER: &str = "Time,ID,X,Y,Z,SpeedX,SpeedY,SpeedZ";

const FIELD_COUNT: usize = 8;

/// One accepted scenario row.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioRow {
    /// Informational release time in seconds; aircraft currently all start
    /// at scenario load.
    pub time_s: f64,
    pub callsign: String,
    pub position: Position,
    pub velocity: Velocity,
}

/// Why a single row was rejected.
#[derive(Debug, Error, PartialEq)]
pub enum RowError {
    #[error("expected {FIELD_COUNT} fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field}: {value:?}")]
    Number { field: &'static str, value: String },
    #[error("callsign {0:?} must be 3-10 alphanumeric characters")]
    Callsign(String),
    #[error("duplicate callsign {0:?}")]
    DuplicateCallsign(String),
    #[error("position ({x}, {y}, {z}) outside airspace")]
    OutOfBounds { x: f64, y: f64, z: f64 },
    #[error("speed {0:.1} outside allowed range")]
    SpeedOutOfRange(f64),
}

/// A failure that aborts the whole load, as opposed to a per-row reject.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing or malformed header (expected {SCENARIO_HEADER:?})")]
    Header,
}

/// Outcome of a load: what was accepted, and line-numbered reasons for
/// everything that was not.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub rows: Vec<ScenarioRow>,
    pub rejected: Vec<(usize, RowError)>,
}

impl LoadReport {
    pub fn accepted(&self) -> usize {
        self.rows.len()
    }
}

pub fn valid_callsign(callsign: &str) -> bool {
    (3..=10).contains(&callsign.len()) && callsign.chars().all(|c| c.is_ascii_alphanumeric())
}

fn parse_field(field: &'static str, value: &str) -> Result<f64, RowError> {
    let parsed: f64 = value.trim().parse().map_err(|_| RowError::Number {
        field,
        value: value.trim().to_string(),
    })?;
    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(RowError::Number {
            field,
            value: value.trim().to_string(),
        })
    }
}

fn parse_row(line: &str, rules: &AirspaceRules) -> Result<ScenarioRow, RowError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(RowError::FieldCount(fields.len()));
    }

    let time_s = parse_field("Time", fields[0])?;
    let callsign = fields[1].trim().to_string();
    if !valid_callsign(&callsign) {
        return Err(RowError::Callsign(callsign));
    }

    let x = parse_field("X", fields[2])?;
    let y = parse_field("Y", fields[3])?;
    let z = parse_field("Z", fields[4])?;
    let vx = parse_field("SpeedX", fields[5])?;
    let vy = parse_field("SpeedY", fields[6])?;
    let vz = parse_field("SpeedZ", fields[7])?;

    let position = Position::new(x, y, z);
    if !rules.contains(&position) {
        return Err(RowError::OutOfBounds { x, y, z });
    }

    let velocity = Velocity::new(vx, vy, vz);
    let speed = velocity.ground_speed();
    if !rules.speed_in_range(speed) {
        return Err(RowError::SpeedOutOfRange(speed));
    }

    Ok(ScenarioRow {
        time_s,
        callsign,
        position,
        velocity,
    })
}

/// Parse a scenario from any line source. The first non-empty line must be
/// the exact header. Rejected rows never abort the load.
pub fn parse_scenario(
    reader: impl BufRead,
    rules: &AirspaceRules,
) -> Result<LoadReport, ScenarioError> {
    let mut report = LoadReport::default();
    let mut header_seen = false;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !header_seen {
            if trimmed != SCENARIO_HEADER {
                return Err(ScenarioError::Header);
            }
            header_seen = true;
            continue;
        }

        match parse_row(trimmed, rules) {
            Ok(row) => {
                if report.rows.iter().any(|r| r.callsign == row.callsign) {
                    report
                        .rejected
                        .push((line_no, RowError::DuplicateCallsign(row.callsign)));
                } else {
                    report.rows.push(row);
                }
            }
            Err(err) => report.rejected.push((line_no, err)),
        }
    }

    if !header_seen {
        return Err(ScenarioError::Header);
    }
    Ok(report)
}

/// Load a scenario file from disk.
pub fn load_scenario(path: &Path, rules: &AirspaceRules) -> Result<LoadReport, ScenarioError> {
    let file = File::open(path)?;
    parse_scenario(BufReader::new(file), rules)
}
