//! Separation monitoring: pairwise violation tests, closest-point-of-approach
//! prediction, warning classification, and resolution advisories.
//!
//! Everything here operates on state snapshots and explicit millisecond
//! clocks so the math is testable without threads or timers.

use crate::models::{AircraftState, Position};
use crate::rules::AirspaceRules;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Predictions are "of interest" while the closest approach is inside
/// `min_horizontal_separation * EARLY_WARNING_THRESHOLD`.
pub const EARLY_WARNING_THRESHOLD: f64 = 3.0;
/// A prediction requires immediate action below this separation ratio.
pub const IMMEDIATE_ACTION_THRESHOLD: f64 = 1.2;
/// Or when the conflict is closer in time than this.
pub const IMMEDIATE_ACTION_TIME_SECS: f64 = 30.0;
/// Minimum interval between successive alerts for the same pair.
pub const WARNING_COOLDOWN_SECS: u64 = 15;
/// Relative horizontal speeds below this are treated as parallel tracks.
const PARALLEL_EPSILON: f64 = 1e-6;

/// Alert severity, ordered so that escalation compares with `>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningLevel {
    /// Separation under 200% of the minimum
    Early,
    /// Separation under 150% of the minimum
    Medium,
    /// Separation under 120% of the minimum
    Critical,
    /// Both separation minima are breached right now
    Violation,
}

impl WarningLevel {
    /// Classify a horizontal separation against the minimum. Returns `None`
    /// while the pair is outside every warning band.
    pub fn classify(horizontal_separation: f64, rules: &AirspaceRules) -> Option<WarningLevel> {
        let r = horizontal_separation / rules.min_horizontal_separation;
        if r < 1.0 {
            Some(WarningLevel::Violation)
        } else if r < IMMEDIATE_ACTION_THRESHOLD {
            Some(WarningLevel::Critical)
        } else if r < 1.5 {
            Some(WarningLevel::Medium)
        } else if r < 2.0 {
            Some(WarningLevel::Early)
        } else {
            None
        }
    }

    /// Numeric alert level carried on the bus and in aircraft state (0-3).
    pub fn alert_level(&self) -> u8 {
        match self {
            WarningLevel::Early => 1,
            WarningLevel::Medium => 2,
            WarningLevel::Critical | WarningLevel::Violation => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::Early => "EARLY",
            WarningLevel::Medium => "MEDIUM",
            WarningLevel::Critical => "CRITICAL",
            WarningLevel::Violation => "VIOLATION",
        }
    }
}

impl std::fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pair currently breaching both separation minima. Callsigns are stored
/// in lexicographic order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationInfo {
    pub aircraft1: String,
    pub aircraft2: String,
    pub horizontal_separation: f64,
    pub vertical_separation: f64,
    /// Monotonic milliseconds of the snapshot the test ran on.
    pub timestamp: u64,
}

/// A predicted future conflict under straight-line extrapolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViolationPrediction {
    pub aircraft1: String,
    pub aircraft2: String,
    /// Seconds until closest horizontal approach.
    pub time_to_violation: f64,
    /// Horizontal separation at closest approach.
    pub min_separation: f64,
    /// Midpoint of the two extrapolated positions at closest approach.
    pub conflict_point: Position,
    pub requires_immediate_action: bool,
    /// Monotonic milliseconds when the prediction was made.
    pub detected_at: u64,
}

/// Lexicographically ordered pair key shared by violations, predictions and
/// warning records.
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Time of closest horizontal approach under constant velocities, clamped to
/// `t >= 0`. Returns `None` for parallel tracks (near-zero relative
/// horizontal velocity); such pairs are classified by current separation
/// only and never produce predictions.
pub fn time_to_closest_approach(s1: &AircraftState, s2: &AircraftState) -> Option<f64> {
    let dx = s2.position.x - s1.position.x;
    let dy = s2.position.y - s1.position.y;
    let dvx = s2.velocity.vx - s1.velocity.vx;
    let dvy = s2.velocity.vy - s1.velocity.vy;

    let a = dvx * dvx + dvy * dvy;
    if a < PARALLEL_EPSILON {
        return None;
    }
    Some((-(dx * dvx + dy * dvy) / a).max(0.0))
}

/// Extrapolate a state forward along its current velocity.
fn extrapolate(state: &AircraftState, seconds: f64) -> Position {
    Position {
        x: state.position.x + state.velocity.vx * seconds,
        y: state.position.y + state.velocity.vy * seconds,
        z: state.position.z + state.velocity.vz * seconds,
    }
}

/// Test a pair for a current loss of separation.
pub fn check_pair(
    s1: &AircraftState,
    s2: &AircraftState,
    rules: &AirspaceRules,
) -> Option<ViolationInfo> {
    let h = s1.position.horizontal_distance(&s2.position);
    let v = s1.position.vertical_distance(&s2.position);

    if h < rules.min_horizontal_separation && v < rules.min_vertical_separation {
        let (aircraft1, aircraft2) = pair_key(&s1.callsign, &s2.callsign);
        Some(ViolationInfo {
            aircraft1,
            aircraft2,
            horizontal_separation: h,
            vertical_separation: v,
            timestamp: s1.timestamp.max(s2.timestamp),
        })
    } else {
        None
    }
}

/// Predict the closest approach for a pair. Returns `None` for parallel
/// tracks.
pub fn predict_pair(
    s1: &AircraftState,
    s2: &AircraftState,
    rules: &AirspaceRules,
    now_ms: u64,
) -> Option<ViolationPrediction> {
    let t = time_to_closest_approach(s1, s2)?;

    let p1 = extrapolate(s1, t);
    let p2 = extrapolate(s2, t);
    let min_separation = p1.horizontal_distance(&p2);

    let (aircraft1, aircraft2) = pair_key(&s1.callsign, &s2.callsign);
    Some(ViolationPrediction {
        aircraft1,
        aircraft2,
        time_to_violation: t,
        min_separation,
        conflict_point: p1.midpoint(&p2),
        requires_immediate_action: t < IMMEDIATE_ACTION_TIME_SECS
            || min_separation < rules.min_horizontal_separation * IMMEDIATE_ACTION_THRESHOLD,
        detected_at: now_ms,
    })
}

/// Whether a prediction falls inside the lookahead window and close enough
/// at CPA to be worth tracking.
pub fn prediction_of_interest(
    prediction: &ViolationPrediction,
    rules: &AirspaceRules,
    lookahead_secs: u32,
) -> bool {
    prediction.time_to_violation <= lookahead_secs as f64
        && prediction.min_separation < rules.min_horizontal_separation * EARLY_WARNING_THRESHOLD
}

/// All currently-breached pairs in a set of snapshots.
pub fn current_violations(states: &[AircraftState], rules: &AirspaceRules) -> Vec<ViolationInfo> {
    let mut violations = Vec::new();
    for i in 0..states.len() {
        for j in (i + 1)..states.len() {
            if let Some(v) = check_pair(&states[i], &states[j], rules) {
                violations.push(v);
            }
        }
    }
    violations
}

/// All predictions of interest for pairs not currently in violation, sorted
/// ascending by time to closest approach.
pub fn predicted_violations(
    states: &[AircraftState],
    rules: &AirspaceRules,
    lookahead_secs: u32,
    now_ms: u64,
) -> Vec<ViolationPrediction> {
    let mut predictions = Vec::new();
    for i in 0..states.len() {
        for j in (i + 1)..states.len() {
            if check_pair(&states[i], &states[j], rules).is_some() {
                continue;
            }
            if let Some(p) = predict_pair(&states[i], &states[j], rules, now_ms) {
                if prediction_of_interest(&p, rules, lookahead_secs) {
                    predictions.push(p);
                }
            }
        }
    }
    predictions.sort_by(|a, b| {
        a.time_to_violation
            .partial_cmp(&b.time_to_violation)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions
}

/// Per-pair warning cooldown records. An entry remembers when the last alert
/// for the pair went out and at what level; escalation to a higher level
/// bypasses the cooldown.
#[derive(Debug, Default)]
pub struct CooldownTable {
    records: HashMap<(String, String), WarningRecord>,
}

#[derive(Debug, Clone, Copy)]
struct WarningRecord {
    last_emitted: u64,
    last_level: WarningLevel,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether an alert at `level` may be emitted for the pair right
    /// now, stamping the record when it may. Suppressed while a same-or-higher
    /// level alert was emitted within the cooldown window.
    pub fn should_emit(
        &mut self,
        a: &str,
        b: &str,
        level: WarningLevel,
        now_ms: u64,
        cooldown_ms: u64,
    ) -> bool {
        let key = pair_key(a, b);
        let emit = match self.records.get(&key) {
            None => true,
            Some(rec) => {
                level > rec.last_level || now_ms.saturating_sub(rec.last_emitted) > cooldown_ms
            }
        };
        if emit {
            self.records.insert(
                key,
                WarningRecord {
                    last_emitted: now_ms,
                    last_level: level,
                },
            );
        }
        emit
    }

    /// Drop records older than `max_age_ms` (nominally twice the cooldown).
    pub fn purge(&mut self, now_ms: u64, max_age_ms: u64) {
        self.records
            .retain(|_, rec| now_ms.saturating_sub(rec.last_emitted) <= max_age_ms);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One advisory step of a proposed conflict resolution. The detector only
/// proposes; nothing in the core commands an aircraft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionAction {
    pub callsign: String,
    pub kind: AdvisoryKind,
    pub mandatory: bool,
    /// 0.0 - 1.0
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum AdvisoryKind {
    Altitude(f64),
    Speed(f64),
    Heading(f64),
}

impl std::fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvisoryKind::Altitude(z) => write!(f, "altitude {z:.0}"),
            AdvisoryKind::Speed(s) => write!(f, "speed {s:.0}"),
            AdvisoryKind::Heading(h) => write!(f, "heading {h:.0}"),
        }
    }
}

/// Smallest angular difference between two headings, in degrees.
fn heading_difference(h1: f64, h2: f64) -> f64 {
    let d = (h1 - h2).abs() % 360.0;
    d.min(360.0 - d)
}

/// Propose diverging maneuvers for a conflicting pair: split altitudes when
/// vertically close, spread speeds when matched, and turn apart when tracks
/// are nearly aligned.
pub fn resolution_actions(
    s1: &AircraftState,
    s2: &AircraftState,
    prediction: &ViolationPrediction,
    rules: &AirspaceRules,
) -> Vec<ResolutionAction> {
    let mandatory = prediction.requires_immediate_action;
    let mut actions = Vec::new();

    let v_sep = s1.position.vertical_distance(&s2.position);
    if v_sep < rules.min_vertical_separation {
        let (lower, higher) = if s1.position.z <= s2.position.z {
            (s1, s2)
        } else {
            (s2, s1)
        };
        let down = (lower.position.z - rules.min_vertical_separation).max(rules.z_min);
        let up = (higher.position.z + rules.min_vertical_separation).min(rules.z_max);
        actions.push(ResolutionAction {
            callsign: lower.callsign.clone(),
            kind: AdvisoryKind::Altitude(down),
            mandatory,
            confidence: 0.8,
        });
        actions.push(ResolutionAction {
            callsign: higher.callsign.clone(),
            kind: AdvisoryKind::Altitude(up),
            mandatory,
            confidence: 0.8,
        });
    }

    let (speed1, speed2) = (s1.speed(), s2.speed());
    if (speed1 - speed2).abs() < 50.0 {
        let (slower, faster) = if speed1 <= speed2 { (s1, s2) } else { (s2, s1) };
        let slow_to = (slower.speed() - 50.0).max(rules.min_speed);
        let fast_to = (faster.speed() + 50.0).min(rules.max_speed);
        actions.push(ResolutionAction {
            callsign: slower.callsign.clone(),
            kind: AdvisoryKind::Speed(slow_to),
            mandatory,
            confidence: 0.6,
        });
        actions.push(ResolutionAction {
            callsign: faster.callsign.clone(),
            kind: AdvisoryKind::Speed(fast_to),
            mandatory,
            confidence: 0.6,
        });
    }

    if heading_difference(s1.heading, s2.heading) < 45.0 {
        let left = (s1.heading + 30.0).rem_euclid(360.0);
        let right = (s2.heading - 30.0).rem_euclid(360.0);
        actions.push(ResolutionAction {
            callsign: s1.callsign.clone(),
            kind: AdvisoryKind::Heading(left),
            mandatory,
            confidence: 0.5,
        });
        actions.push(ResolutionAction {
            callsign: s2.callsign.clone(),
            kind: AdvisoryKind::Heading(right),
            mandatory,
            confidence: 0.5,
        });
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Velocity;

    fn state(callsign: &str, pos: (f64, f64, f64), vel: (f64, f64, f64)) -> AircraftState {
        AircraftState::new(
            callsign,
            Position::new(pos.0, pos.1, pos.2),
            Velocity::new(vel.0, vel.1, vel.2),
        )
    }

    #[test]
    fn violation_requires_both_minima_breached() {
        let rules = AirspaceRules::default();
        // close horizontally, separated vertically
        let a = state("AC001", (50_000.0, 50_000.0, 20_000.0), (0.0, 0.0, 0.0));
        let b = state("AC002", (50_000.0, 50_000.0, 21_500.0), (0.0, 0.0, 0.0));
        assert!(check_pair(&a, &b, &rules).is_none());

        // both breached
        let c = state("AC003", (50_000.0, 50_000.0, 20_600.0), (0.0, 0.0, 0.0));
        let v = check_pair(&a, &c, &rules).expect("violation");
        assert!(v.horizontal_separation < rules.min_horizontal_separation);
        assert!((v.vertical_separation - 600.0).abs() < 1e-9);
        // lexicographic ordering of the pair
        assert_eq!(v.aircraft1, "AC001");
        assert_eq!(v.aircraft2, "AC003");
    }

    #[test]
    fn head_on_pair_meets_at_the_midpoint() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (60_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (40_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));

        let p = predict_pair(&a, &b, &rules, 0).expect("closing pair predicts");
        assert!((p.time_to_violation - 25.0).abs() < 1e-6);
        assert!(p.min_separation < 1.0);
        assert!((p.conflict_point.x - 50_000.0).abs() < 1e-6);
        assert!(p.requires_immediate_action);
    }

    #[test]
    fn parallel_tracks_never_predict() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (10_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let b = state("AC002", (10_000.0, 60_000.0, 20_000.0), (400.0, 0.0, 0.0));
        assert!(time_to_closest_approach(&a, &b).is_none());
        assert!(predict_pair(&a, &b, &rules, 0).is_none());
        assert!(predicted_violations(&[a, b], &rules, 180, 0).is_empty());
    }

    #[test]
    fn diverging_pair_clamps_cpa_to_now() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (40_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (60_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let p = predict_pair(&a, &b, &rules, 0).expect("not parallel");
        assert_eq!(p.time_to_violation, 0.0);
        assert!((p.min_separation - 20_000.0).abs() < 1e-6);
    }

    #[test]
    fn current_violation_is_not_also_a_prediction() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (50_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (48_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let states = vec![a, b];
        assert_eq!(current_violations(&states, &rules).len(), 1);
        assert!(predicted_violations(&states, &rules, 180, 0).is_empty());
    }

    #[test]
    fn predictions_sort_by_time_to_violation() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (60_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (40_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let c = state("AC003", (90_000.0, 50_000.0, 21_800.0), (-400.0, 0.0, 0.0));
        let d = state("AC004", (10_000.0, 50_000.0, 21_800.0), (400.0, 0.0, 0.0));
        let predictions = predicted_violations(&[a, b, c, d], &rules, 180, 0);
        assert!(predictions.len() >= 2);
        for w in predictions.windows(2) {
            assert!(w[0].time_to_violation <= w[1].time_to_violation);
        }
    }

    #[test]
    fn warning_bands_follow_separation_ratio() {
        let rules = AirspaceRules::default();
        let h = rules.min_horizontal_separation;
        assert_eq!(WarningLevel::classify(h * 0.5, &rules), Some(WarningLevel::Violation));
        assert_eq!(WarningLevel::classify(h * 1.1, &rules), Some(WarningLevel::Critical));
        assert_eq!(WarningLevel::classify(h * 1.3, &rules), Some(WarningLevel::Medium));
        assert_eq!(WarningLevel::classify(h * 1.9, &rules), Some(WarningLevel::Early));
        assert_eq!(WarningLevel::classify(h * 2.5, &rules), None);
    }

    #[test]
    fn cooldown_suppresses_repeat_alerts() {
        let mut table = CooldownTable::new();
        let cooldown = WARNING_COOLDOWN_SECS * 1000;

        assert!(table.should_emit("AC001", "AC002", WarningLevel::Violation, 0, cooldown));
        // same level inside the window, regardless of argument order
        assert!(!table.should_emit("AC002", "AC001", WarningLevel::Violation, 5_000, cooldown));
        // window expired
        assert!(table.should_emit("AC001", "AC002", WarningLevel::Violation, 15_001, cooldown));
    }

    #[test]
    fn escalation_bypasses_cooldown() {
        let mut table = CooldownTable::new();
        let cooldown = WARNING_COOLDOWN_SECS * 1000;

        assert!(table.should_emit("AC001", "AC002", WarningLevel::Early, 0, cooldown));
        assert!(table.should_emit("AC001", "AC002", WarningLevel::Critical, 2_000, cooldown));
        // de-escalation stays suppressed
        assert!(!table.should_emit("AC001", "AC002", WarningLevel::Early, 4_000, cooldown));
    }

    #[test]
    fn purge_drops_stale_records() {
        let mut table = CooldownTable::new();
        let cooldown = WARNING_COOLDOWN_SECS * 1000;
        table.should_emit("AC001", "AC002", WarningLevel::Early, 0, cooldown);
        table.should_emit("AC003", "AC004", WarningLevel::Early, 20_000, cooldown);

        table.purge(31_000, 2 * cooldown);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn vertical_conflict_proposes_altitude_split() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (50_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (46_000.0, 50_000.0, 20_400.0), (400.0, 0.0, 0.0));
        let p = predict_pair(&a, &b, &rules, 0).unwrap();
        let actions = resolution_actions(&a, &b, &p, &rules);

        let altitudes: Vec<_> = actions
            .iter()
            .filter_map(|a| match a.kind {
                AdvisoryKind::Altitude(z) => Some((a.callsign.clone(), z)),
                _ => None,
            })
            .collect();
        assert_eq!(altitudes.len(), 2);
        // lower aircraft descends, higher climbs
        assert!(altitudes.iter().any(|(c, z)| c == "AC001" && *z == 19_000.0));
        assert!(altitudes.iter().any(|(c, z)| c == "AC002" && *z == 21_400.0));
    }

    #[test]
    fn advisory_altitudes_respect_airspace_bounds() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (50_000.0, 50_000.0, 15_200.0), (-400.0, 0.0, 0.0));
        let b = state("AC002", (46_000.0, 50_000.0, 15_400.0), (400.0, 0.0, 0.0));
        let p = predict_pair(&a, &b, &rules, 0).unwrap();
        let actions = resolution_actions(&a, &b, &p, &rules);
        for action in &actions {
            if let AdvisoryKind::Altitude(z) = action.kind {
                assert!(z >= rules.z_min && z <= rules.z_max);
            }
        }
    }

    #[test]
    fn matched_speeds_propose_a_spread() {
        let rules = AirspaceRules::default();
        let a = state("AC001", (60_000.0, 50_000.0, 20_000.0), (-300.0, 0.0, 0.0));
        let b = state("AC002", (40_000.0, 50_000.0, 20_000.0), (300.0, 0.0, 0.0));
        let p = predict_pair(&a, &b, &rules, 0).unwrap();
        let actions = resolution_actions(&a, &b, &p, &rules);
        let speeds: Vec<_> = actions
            .iter()
            .filter_map(|a| match a.kind {
                AdvisoryKind::Speed(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(speeds.len(), 2);
        assert!(speeds.iter().all(|s| *s >= rules.min_speed && *s <= rules.max_speed));
    }
}
