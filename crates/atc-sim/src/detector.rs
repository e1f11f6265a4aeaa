//! Violation detector: periodic pairwise separation surveillance.
//!
//! Each tick classifies every unordered pair of known aircraft as
//! in-violation, predicted conflict, or safe; emits cooldown-gated alerts on
//! the bus; and adapts its own period under load so close pairs are watched
//! at twice the nominal rate.

use atc_core::conflict::{
    self, prediction_of_interest, CooldownTable, ViolationInfo, ViolationPrediction, WarningLevel,
    WARNING_COOLDOWN_SECS,
};
use atc_core::{AircraftState, AirspaceRules};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::aircraft::AircraftHandle;
use crate::bus::{AlertData, BusSender, Message};
use crate::runner::PeriodHandle;

/// Nominal check period.
pub const NOMINAL_PERIOD: Duration = Duration::from_secs(1);
/// Period while any pair is inside the critical band.
pub const FAST_PERIOD: Duration = Duration::from_millis(500);

const COOLDOWN_MS: u64 = WARNING_COOLDOWN_SECS * 1_000;

pub struct ViolationDetector {
    aircraft: Mutex<Vec<AircraftHandle>>,
    rules: AirspaceRules,
    lookahead_secs: AtomicU32,
    cooldowns: Mutex<CooldownTable>,
    /// Alert band per aircraft as of the last tick (0 = clear).
    alert_levels: Mutex<HashMap<String, u8>>,
    bus: BusSender,
    period: Mutex<Option<PeriodHandle>>,
    checks: AtomicU64,
    violations_detected: AtomicU64,
    alerts_emitted: AtomicU64,
}

impl ViolationDetector {
    pub fn new(rules: AirspaceRules, bus: BusSender) -> Self {
        let lookahead = rules.default_lookahead_secs;
        tracing::info!(lookahead_secs = lookahead, "violation detector initialized");
        Self {
            aircraft: Mutex::new(Vec::new()),
            rules,
            lookahead_secs: AtomicU32::new(lookahead),
            cooldowns: Mutex::new(CooldownTable::new()),
            alert_levels: Mutex::new(HashMap::new()),
            bus,
            period: Mutex::new(None),
            checks: AtomicU64::new(0),
            violations_detected: AtomicU64::new(0),
            alerts_emitted: AtomicU64::new(0),
        }
    }

    /// Attach the period handle of the runner that drives this detector so
    /// the tick can adapt its own cadence.
    pub fn attach_period(&self, period: PeriodHandle) {
        *self.period.lock().expect("detector lock") = Some(period);
    }

    pub fn add(&self, handle: AircraftHandle) {
        tracing::info!(callsign = %handle.callsign(), "aircraft added to violation detector");
        self.aircraft.lock().expect("detector lock").push(handle);
    }

    pub fn remove(&self, callsign: &str) {
        let mut aircraft = self.aircraft.lock().expect("detector lock");
        aircraft.retain(|h| h.callsign() != callsign);
        tracing::info!(callsign, "aircraft removed from violation detector");
    }

    /// Clamp and set the prediction window.
    pub fn set_lookahead(&self, seconds: u32) {
        let clamped = self.rules.clamp_lookahead(seconds);
        self.lookahead_secs.store(clamped, Ordering::Relaxed);
        tracing::info!(lookahead_secs = clamped, "lookahead updated");
    }

    pub fn lookahead(&self) -> u32 {
        self.lookahead_secs.load(Ordering::Relaxed)
    }

    pub fn checks_performed(&self) -> u64 {
        self.checks.load(Ordering::Relaxed)
    }

    pub fn violations_detected(&self) -> u64 {
        self.violations_detected.load(Ordering::Relaxed)
    }

    pub fn alerts_emitted(&self) -> u64 {
        self.alerts_emitted.load(Ordering::Relaxed)
    }

    fn snapshots(&self) -> Vec<AircraftState> {
        let aircraft = self.aircraft.lock().expect("detector lock");
        aircraft.iter().map(|h| h.snapshot()).collect()
    }

    /// Pairs currently breaching both separation minima.
    pub fn current_violations(&self) -> Vec<ViolationInfo> {
        conflict::current_violations(&self.snapshots(), &self.rules)
    }

    /// Predictions of interest, soonest first.
    pub fn predicted_violations(&self, now_ms: u64) -> Vec<ViolationPrediction> {
        conflict::predicted_violations(&self.snapshots(), &self.rules, self.lookahead(), now_ms)
    }

    /// Alert band per aircraft from the last tick.
    pub fn alert_levels(&self) -> HashMap<String, u8> {
        self.alert_levels.lock().expect("detector lock").clone()
    }

    /// One detection tick at monotonic time `now_ms`.
    pub fn tick(&self, now_ms: u64) {
        let states = self.snapshots();
        let lookahead = self.lookahead();
        let mut levels: HashMap<String, u8> =
            states.iter().map(|s| (s.callsign.clone(), 0u8)).collect();
        let mut any_critical = false;

        for i in 0..states.len() {
            for j in (i + 1)..states.len() {
                let s1 = &states[i];
                let s2 = &states[j];
                self.checks.fetch_add(1, Ordering::Relaxed);

                let h = s1.position.horizontal_distance(&s2.position);
                let v = s1.position.vertical_distance(&s2.position);
                if !h.is_finite() || !v.is_finite() {
                    // corrupt snapshot: skip the pair, keep the tick alive
                    tracing::warn!(
                        aircraft1 = %s1.callsign,
                        aircraft2 = %s2.callsign,
                        "non-finite separation, pair skipped"
                    );
                    continue;
                }

                let outcome = self.evaluate_pair(s1, s2, h, v, lookahead, now_ms);
                if let Some(level) = outcome {
                    if level >= WarningLevel::Critical {
                        any_critical = true;
                    }
                    for callsign in [&s1.callsign, &s2.callsign] {
                        let entry = levels.entry(callsign.clone()).or_default();
                        *entry = (*entry).max(level.alert_level());
                    }
                }
            }
        }

        *self.alert_levels.lock().expect("detector lock") = levels;

        if let Some(period) = self.period.lock().expect("detector lock").as_ref() {
            let target = if any_critical { FAST_PERIOD } else { NOMINAL_PERIOD };
            if period.get() != target {
                tracing::debug!(period_ms = target.as_millis() as u64, "detector period adapted");
                period.set(target);
            }
        }

        self.cooldowns
            .lock()
            .expect("detector lock")
            .purge(now_ms, 2 * COOLDOWN_MS);
    }

    /// Classify one pair and emit an alert when a band is reached and the
    /// cooldown allows. Returns the band the pair is in, if any.
    fn evaluate_pair(
        &self,
        s1: &AircraftState,
        s2: &AircraftState,
        h: f64,
        v: f64,
        lookahead: u32,
        now_ms: u64,
    ) -> Option<WarningLevel> {
        if let Some(violation) = conflict::check_pair(s1, s2, &self.rules) {
            self.violations_detected.fetch_add(1, Ordering::Relaxed);
            self.emit_violation_alert(s1, s2, &violation, now_ms);
            return Some(WarningLevel::Violation);
        }

        let prediction = conflict::predict_pair(s1, s2, &self.rules, now_ms)?;
        if !prediction_of_interest(&prediction, &self.rules, lookahead) {
            return None;
        }

        // Band by current horizontal separation; a non-violating pair never
        // escalates past CRITICAL even when overlapped horizontally.
        let level = match WarningLevel::classify(h, &self.rules)? {
            WarningLevel::Violation => WarningLevel::Critical,
            level => level,
        };

        if self.should_emit(&s1.callsign, &s2.callsign, level, now_ms) {
            let description = format!(
                "{} WARNING - {} and {}: closest approach {:.0} in {:.1}s",
                level, prediction.aircraft1, prediction.aircraft2,
                prediction.min_separation, prediction.time_to_violation,
            );
            self.send_alert(AlertData {
                level: level.alert_level(),
                aircraft1: prediction.aircraft1.clone(),
                aircraft2: prediction.aircraft2.clone(),
                horizontal_separation: h,
                vertical_separation: v,
                time_to_violation: prediction.time_to_violation,
                description,
                at: now_ms,
            });
        }
        Some(level)
    }

    fn emit_violation_alert(
        &self,
        s1: &AircraftState,
        s2: &AircraftState,
        violation: &ViolationInfo,
        now_ms: u64,
    ) {
        if !self.should_emit(&s1.callsign, &s2.callsign, WarningLevel::Violation, now_ms) {
            return;
        }

        // Advisory resolution sequence rides along with the alert text; the
        // detector proposes, it never commands.
        let prediction = ViolationPrediction {
            aircraft1: violation.aircraft1.clone(),
            aircraft2: violation.aircraft2.clone(),
            time_to_violation: 0.0,
            min_separation: violation.horizontal_separation,
            conflict_point: s1.position.midpoint(&s2.position),
            requires_immediate_action: true,
            detected_at: now_ms,
        };
        let actions = conflict::resolution_actions(s1, s2, &prediction, &self.rules);

        let mut description = format!(
            "IMMEDIATE VIOLATION - {} and {}: horizontal {:.0}, vertical {:.0}",
            violation.aircraft1,
            violation.aircraft2,
            violation.horizontal_separation,
            violation.vertical_separation,
        );
        for action in &actions {
            description.push_str(&format!(
                "; advise {} {} ({}%{})",
                action.callsign,
                action.kind,
                (action.confidence * 100.0) as u32,
                if action.mandatory { ", mandatory" } else { "" },
            ));
        }

        self.send_alert(AlertData {
            level: WarningLevel::Violation.alert_level(),
            aircraft1: violation.aircraft1.clone(),
            aircraft2: violation.aircraft2.clone(),
            horizontal_separation: violation.horizontal_separation,
            vertical_separation: violation.vertical_separation,
            time_to_violation: 0.0,
            description,
            at: now_ms,
        });
    }

    fn should_emit(&self, a: &str, b: &str, level: WarningLevel, now_ms: u64) -> bool {
        self.cooldowns
            .lock()
            .expect("detector lock")
            .should_emit(a, b, level, now_ms, COOLDOWN_MS)
    }

    fn send_alert(&self, alert: AlertData) {
        tracing::warn!(
            level = alert.level,
            aircraft1 = %alert.aircraft1,
            aircraft2 = %alert.aircraft2,
            "{}",
            alert.description
        );
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
        if self.bus.send(Message::Alert(alert)).is_err() {
            tracing::debug!("bus closed, alert dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aircraft::Aircraft;
    use crate::bus::MessageBus;
    use atc_core::{Position, Velocity};

    fn make_aircraft(callsign: &str, pos: (f64, f64, f64), vel: (f64, f64, f64)) -> Aircraft {
        Aircraft::new(
            callsign,
            Position::new(pos.0, pos.1, pos.2),
            Velocity::new(vel.0, vel.1, vel.2),
            AirspaceRules::default(),
            Duration::from_secs(1),
        )
        .unwrap()
    }

    fn detector() -> (ViolationDetector, MessageBus) {
        let bus = MessageBus::new();
        let detector = ViolationDetector::new(AirspaceRules::default(), bus.sender("DETECTOR"));
        (detector, bus)
    }

    fn drain_alerts(bus: &MessageBus) -> Vec<AlertData> {
        let rx = bus.receiver();
        let mut alerts = Vec::new();
        while let Some(envelope) = rx.try_receive() {
            if let Message::Alert(alert) = envelope.message {
                alerts.push(alert);
            }
        }
        alerts
    }

    #[test]
    fn reports_current_violation() {
        let (detector, _bus) = detector();
        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (51_000.0, 50_000.0, 20_500.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        let violations = detector.current_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].aircraft1, "AC001");
        assert_eq!(violations[0].aircraft2, "AC002");
    }

    #[test]
    fn violation_alert_carries_advisories() {
        let (detector, bus) = detector();
        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (51_000.0, 50_000.0, 20_500.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        detector.tick(1_000);
        let alerts = drain_alerts(&bus);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 3);
        assert_eq!(alerts[0].time_to_violation, 0.0);
        assert!(alerts[0].description.contains("IMMEDIATE VIOLATION"));
        assert!(alerts[0].description.contains("advise"));
        assert_eq!(detector.violations_detected(), 1);
    }

    #[test]
    fn cooldown_limits_alert_rate() {
        let (detector, bus) = detector();
        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (51_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        // 60 s of 1 Hz ticks with the pair continuously in violation
        for t in 0..60u64 {
            detector.tick(t * 1_000);
        }
        let alerts = drain_alerts(&bus);
        assert_eq!(alerts.len(), 4, "expected ceil(60/15) alerts");
    }

    #[test]
    fn safe_parallel_pair_stays_quiet() {
        let (detector, bus) = detector();
        let a = make_aircraft("AC001", (10_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (10_000.0, 60_000.0, 20_000.0), (400.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        for t in 0..60u64 {
            detector.tick(t * 1_000);
        }
        assert!(drain_alerts(&bus).is_empty());
        assert!(detector.current_violations().is_empty());
        assert!(detector.predicted_violations(60_000).is_empty());
    }

    #[test]
    fn vertical_separation_gates_the_violation() {
        let (detector, _bus) = detector();
        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (50_000.0, 50_000.0, 21_500.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        // 1500 >= V_MIN: no violation
        assert!(detector.current_violations().is_empty());

        // lower climbs to 20400: vertical 1100, still safe
        assert!(a.update_altitude(20_400.0));
        assert!(detector.current_violations().is_empty());

        // 20600: vertical 900 < V_MIN with zero horizontal -> violation
        assert!(a.update_altitude(20_600.0));
        let violations = detector.current_violations();
        assert_eq!(violations.len(), 1);
        assert!((violations[0].vertical_separation - 900.0).abs() < 1e-9);
    }

    #[test]
    fn head_on_pair_warns_before_violating() {
        let (detector, bus) = detector();
        let a = make_aircraft("AC001", (60_000.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (40_000.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        // far apart: prediction of interest exists but no warning band yet
        detector.tick(0);
        assert!(drain_alerts(&bus).is_empty());
        assert_eq!(detector.predicted_violations(0).len(), 1);

        // the same pair ~18 s later: separation 5600 < 2 * H_MIN
        let (detector, bus) = self::detector();
        let a = make_aircraft("AC003", (52_800.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = make_aircraft("AC004", (47_200.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());
        detector.tick(18_000);
        let alerts = drain_alerts(&bus);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, WarningLevel::Early.alert_level());

        // and once inside H_MIN with matching altitude it is a violation
        let (detector, bus) = self::detector();
        let a = make_aircraft("AC005", (51_200.0, 50_000.0, 20_000.0), (-400.0, 0.0, 0.0));
        let b = make_aircraft("AC006", (48_800.0, 50_000.0, 20_000.0), (400.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());
        detector.tick(22_000);
        let alerts = drain_alerts(&bus);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, 3);
        assert_eq!(alerts[0].time_to_violation, 0.0);
    }

    #[test]
    fn detector_period_adapts_under_load() {
        let (detector, _bus) = detector();
        let period = PeriodHandle::new(NOMINAL_PERIOD);
        detector.attach_period(period.clone());

        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (51_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());

        detector.tick(1_000);
        assert_eq!(period.get(), FAST_PERIOD);

        detector.remove("AC002");
        detector.tick(2_000);
        assert_eq!(period.get(), NOMINAL_PERIOD);
    }

    #[test]
    fn alert_levels_follow_band_membership() {
        let (detector, _bus) = detector();
        let a = make_aircraft("AC001", (50_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let b = make_aircraft("AC002", (51_000.0, 50_000.0, 20_000.0), (200.0, 0.0, 0.0));
        let c = make_aircraft("AC009", (10_000.0, 10_000.0, 24_000.0), (200.0, 0.0, 0.0));
        detector.add(a.handle());
        detector.add(b.handle());
        detector.add(c.handle());

        detector.tick(1_000);
        let levels = detector.alert_levels();
        assert_eq!(levels.get("AC001"), Some(&3));
        assert_eq!(levels.get("AC002"), Some(&3));
        assert_eq!(levels.get("AC009"), Some(&0));
    }

    #[test]
    fn lookahead_is_clamped() {
        let (detector, _bus) = detector();
        detector.set_lookahead(0);
        assert_eq!(detector.lookahead(), 1);
        detector.set_lookahead(10_000);
        assert_eq!(detector.lookahead(), 300);
        detector.set_lookahead(120);
        assert_eq!(detector.lookahead(), 120);
    }
}
