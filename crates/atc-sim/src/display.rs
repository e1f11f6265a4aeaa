//! Terminal radar display.
//!
//! Renders the latest airspace frame pushed by the orchestrator: a planview
//! grid of the airspace, per-aircraft rows, active violations and
//! predictions, and an optional focus panel. Rendering is pure string
//! building so tests can inspect frames without a terminal.

use atc_core::conflict::{ViolationInfo, ViolationPrediction};
use atc_core::{AircraftState, AirspaceRules};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::runner::PeriodHandle;

/// Grid dimensions of the planview.
const GRID_WIDTH: usize = 50;
const GRID_HEIGHT: usize = 25;
/// Bounds on the operator-adjustable refresh rate.
pub const MIN_REFRESH_SECS: u64 = 1;
pub const MAX_REFRESH_SECS: u64 = 10;
/// Alert lines kept for the alert panel.
const ALERT_PANEL_LINES: usize = 5;

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Direction symbols by 45-degree octant, starting at east (heading 0 = +x)
/// and moving counter-clockwise.
const DIRECTION_SYMBOLS: [char; 8] = ['>', '/', '^', '\\', '<', '/', 'v', '\\'];

/// One rendering input: everything shown on screen for a single refresh.
#[derive(Debug, Clone, Default)]
pub struct DisplayFrame {
    pub aircraft: Vec<AircraftState>,
    pub violations: Vec<ViolationInfo>,
    pub predictions: Vec<ViolationPrediction>,
}

pub struct RadarDisplay {
    rules: AirspaceRules,
    paused: AtomicBool,
    focus: Mutex<Option<String>>,
    frame: Mutex<DisplayFrame>,
    alerts: Mutex<Vec<String>>,
    update_count: AtomicU64,
    period: Mutex<Option<PeriodHandle>>,
}

impl RadarDisplay {
    pub fn new(rules: AirspaceRules) -> Self {
        tracing::info!("display system initialized");
        Self {
            rules,
            paused: AtomicBool::new(false),
            focus: Mutex::new(None),
            frame: Mutex::new(DisplayFrame::default()),
            alerts: Mutex::new(Vec::new()),
            update_count: AtomicU64::new(0),
            period: Mutex::new(None),
        }
    }

    /// Attach the driving runner's period so DISPLAY commands can retune it.
    pub fn attach_period(&self, period: PeriodHandle) {
        *self.period.lock().expect("display lock") = Some(period);
    }

    pub fn set_focus(&self, callsign: Option<String>) {
        *self.focus.lock().expect("display lock") = callsign;
    }

    pub fn focus(&self) -> Option<String> {
        self.focus.lock().expect("display lock").clone()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    /// Clamp and apply a new refresh period.
    pub fn set_refresh_secs(&self, seconds: u64) {
        let clamped = seconds.clamp(MIN_REFRESH_SECS, MAX_REFRESH_SECS);
        if let Some(period) = self.period.lock().expect("display lock").as_ref() {
            period.set(Duration::from_secs(clamped));
        }
        tracing::info!(seconds = clamped, "display refresh rate set");
    }

    /// Replace the frame shown at the next refresh.
    pub fn push_frame(&self, frame: DisplayFrame) {
        *self.frame.lock().expect("display lock") = frame;
    }

    /// Append to the alert panel, keeping the most recent lines.
    pub fn push_alert(&self, line: String) {
        let mut alerts = self.alerts.lock().expect("display lock");
        alerts.push(line);
        let excess = alerts.len().saturating_sub(ALERT_PANEL_LINES);
        if excess > 0 {
            alerts.drain(..excess);
        }
    }

    pub fn update_count(&self) -> u64 {
        self.update_count.load(Ordering::Relaxed)
    }

    /// One display tick: render the current frame to stdout unless paused.
    pub fn tick(&self) {
        if self.is_paused() {
            return;
        }
        let rendered = self.render();
        print!("{rendered}");
        use std::io::Write;
        let _ = std::io::stdout().flush();
    }

    /// Build the full screen as a string.
    pub fn render(&self) -> String {
        let count = self.update_count.fetch_add(1, Ordering::Relaxed) + 1;
        let frame = self.frame.lock().expect("display lock").clone();
        let alerts = self.alerts.lock().expect("display lock").clone();
        let focus = self.focus();

        let mut out = String::with_capacity(4096);
        out.push_str(CLEAR_SCREEN);
        out.push_str(&format!(
            "{BOLD}=== Air Traffic Control - {} aircraft ==={RESET}\n",
            frame.aircraft.len()
        ));
        out.push_str(&format!("Time: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
        out.push_str(&"-".repeat(70));
        out.push('\n');

        self.render_legend(&mut out);
        self.render_grid(&mut out, &frame.aircraft);
        self.render_aircraft_table(&mut out, &frame.aircraft);
        self.render_conflicts(&mut out, &frame);
        if !alerts.is_empty() {
            out.push_str(&format!("{BOLD}Alerts:{RESET}\n"));
            for line in &alerts {
                out.push_str(&format!("  {YELLOW}{line}{RESET}\n"));
            }
        }
        if let Some(focus) = focus {
            self.render_focus(&mut out, &frame.aircraft, &focus);
        }

        out.push_str(&"-".repeat(70));
        out.push_str(&format!("\nupdate #{count}\n{}", crate::console::PROMPT));
        out
    }

    fn render_legend(&self, out: &mut String) {
        out.push_str(&format!(
            "{CYAN}Levels: UPPERCASE >21k ft, normal 19-21k, lowercase <19k   \
             Direction: > E / NE ^ N \\ NW < W v S{RESET}\n"
        ));
    }

    /// Planview of the airspace; row 0 is the north (max y) edge.
    fn render_grid(&self, out: &mut String, aircraft: &[AircraftState]) {
        let mut grid = vec![vec!['.'; GRID_WIDTH]; GRID_HEIGHT];
        for state in aircraft {
            let col = ((state.position.x - self.rules.x_min)
                / (self.rules.x_max - self.rules.x_min)
                * (GRID_WIDTH - 1) as f64)
                .round();
            let row = ((self.rules.y_max - state.position.y)
                / (self.rules.y_max - self.rules.y_min)
                * (GRID_HEIGHT - 1) as f64)
                .round();
            if !(0.0..GRID_WIDTH as f64).contains(&col) || !(0.0..GRID_HEIGHT as f64).contains(&row)
            {
                continue;
            }
            grid[row as usize][col as usize] = grid_symbol(state);
        }

        out.push('+');
        out.push_str(&"-".repeat(GRID_WIDTH));
        out.push_str("+\n");
        for row in &grid {
            out.push('|');
            out.extend(row.iter());
            out.push_str("|\n");
        }
        out.push('+');
        out.push_str(&"-".repeat(GRID_WIDTH));
        out.push_str("+\n");
    }

    fn render_aircraft_table(&self, out: &mut String, aircraft: &[AircraftState]) {
        out.push_str(&format!(
            "{BOLD}{:<10} {:>9} {:>9} {:>7} {:>6} {:>7}  {:<9} {}{RESET}\n",
            "CALLSIGN", "X", "Y", "ALT", "SPD", "HDG", "STATUS", "ALERT"
        ));
        for state in aircraft {
            let color = match state.alert_level {
                3 => RED,
                1 | 2 => YELLOW,
                _ => RESET,
            };
            out.push_str(&format!(
                "{color}{:<10} {:>9.0} {:>9.0} {:>7.0} {:>6.0} {:>6.1}{} {:<9} {}{RESET}\n",
                state.callsign,
                state.position.x,
                state.position.y,
                state.position.z,
                state.speed(),
                state.heading,
                direction_symbol(state.heading),
                state.status,
                alert_badge(state.alert_level),
            ));
        }
    }

    fn render_conflicts(&self, out: &mut String, frame: &DisplayFrame) {
        if !frame.violations.is_empty() {
            out.push_str(&format!("{RED}{BOLD}ACTIVE VIOLATIONS:{RESET}\n"));
            for v in &frame.violations {
                out.push_str(&format!(
                    "{RED}  {} - {}: horizontal {:.0}, vertical {:.0}{RESET}\n",
                    v.aircraft1, v.aircraft2, v.horizontal_separation, v.vertical_separation
                ));
            }
        }
        if !frame.predictions.is_empty() {
            out.push_str(&format!("{YELLOW}{BOLD}PREDICTED CONFLICTS:{RESET}\n"));
            for p in &frame.predictions {
                out.push_str(&format!(
                    "{YELLOW}  {} - {}: closest {:.0} in {:.0}s at ({:.0}, {:.0}){RESET}\n",
                    p.aircraft1,
                    p.aircraft2,
                    p.min_separation,
                    p.time_to_violation,
                    p.conflict_point.x,
                    p.conflict_point.y
                ));
            }
        }
    }

    fn render_focus(&self, out: &mut String, aircraft: &[AircraftState], focus: &str) {
        out.push_str(&format!("{BOLD}Track focus: {focus}{RESET}\n"));
        match aircraft.iter().find(|s| s.callsign == focus) {
            Some(state) => {
                out.push_str(&format!(
                    "  position ({:.1}, {:.1}, {:.1})\n  velocity ({:.1}, {:.1}, {:.1})\n  \
                     speed {:.1}  heading {:.1}  status {}  alert {}\n",
                    state.position.x,
                    state.position.y,
                    state.position.z,
                    state.velocity.vx,
                    state.velocity.vy,
                    state.velocity.vz,
                    state.speed(),
                    state.heading,
                    state.status,
                    state.alert_level,
                ));
            }
            None => out.push_str("  (not in the current picture)\n"),
        }
    }
}

/// Symbol for the planview grid: first callsign letter, cased by flight
/// level.
fn grid_symbol(state: &AircraftState) -> char {
    let letter = state.callsign.chars().next().unwrap_or('?');
    if state.position.z > 21_000.0 {
        letter.to_ascii_uppercase()
    } else if state.position.z < 19_000.0 {
        letter.to_ascii_lowercase()
    } else {
        letter
    }
}

/// Octant arrow for a heading (0 = +x = east, counter-clockwise).
fn direction_symbol(heading: f64) -> char {
    let index = (((heading + 22.5).rem_euclid(360.0)) / 45.0) as usize % 8;
    DIRECTION_SYMBOLS[index]
}

fn alert_badge(level: u8) -> &'static str {
    match level {
        3 => "\u{2588}", // solid block: critical or violation
        2 => "\u{25b2}", // triangle: medium
        1 => "\u{25cf}", // dot: early
        _ => "",
    }
}
