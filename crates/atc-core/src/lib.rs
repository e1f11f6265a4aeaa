//! ATC Core - Pure logic for the airspace simulation
//!
//! This crate contains the domain models, airspace rules, and the
//! separation/conflict math with NO runtime dependencies. Everything here is
//! synchronous and deterministic; time enters only as explicit millisecond
//! arguments supplied by the caller.

pub mod conflict;
pub mod models;
pub mod rules;
pub mod scenario;

pub use conflict::{
    current_violations, predicted_violations, resolution_actions, AdvisoryKind, CooldownTable,
    ResolutionAction, ViolationInfo, ViolationPrediction, WarningLevel,
};
pub use models::{AircraftState, AircraftStatus, Position, RadarTrack, Velocity};
pub use rules::AirspaceRules;
pub use scenario::{parse_scenario, LoadReport, ScenarioRow};
