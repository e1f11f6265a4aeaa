//! Orchestrator: owns every aircraft and subsystem, routes bus traffic, and
//! manages startup and bounded shutdown.
//!
//! Ownership is exclusive: aircraft entities live here and nowhere else.
//! Every other component holds read-only handles and receives value
//! snapshots, so no two components can ever mutate the same aircraft.

use anyhow::{bail, Context, Result};
use atc_core::scenario::{self, LoadReport};
use atc_core::AirspaceRules;
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::aircraft::Aircraft;
use crate::bus::{BusReceiver, BusSender, CommandData, CommandVerb, Message, MessageBus, StatusData};
use crate::clock;
use crate::config::Config;
use crate::console::OperatorConsole;
use crate::detector::ViolationDetector;
use crate::display::{DisplayFrame, RadarDisplay};
use crate::history::HistoryLogger;
use crate::radar::RadarTracker;
use crate::runner::{PeriodicRunner, TaskPriority};

/// Counters reported in the periodic metrics line and STATUS output.
#[derive(Debug, Default)]
struct Metrics {
    position_updates: u64,
    commands_processed: u64,
    alerts_received: u64,
}

pub struct Orchestrator {
    config: Config,
    rules: AirspaceRules,
    bus: MessageBus,
    stop_flag: Arc<AtomicBool>,
    aircraft: HashMap<String, Aircraft>,
    radar: Arc<RadarTracker>,
    detector: Arc<ViolationDetector>,
    display: Arc<RadarDisplay>,
    history: Arc<HistoryLogger>,
    console: Arc<OperatorConsole>,
    console_input: Sender<String>,
    bus_rx: BusReceiver,
    reply_tx: BusSender,
    runners: Vec<PeriodicRunner>,
    started_at: Instant,
    last_metrics: Instant,
    metrics: Metrics,
    load_report: LoadReport,
}

impl Orchestrator {
    /// Load the scenario and wire every component. Fails only on fatal
    /// startup errors: unreadable scenario, malformed header, or a scenario
    /// with no usable aircraft.
    pub fn new(config: Config) -> Result<Self> {
        let rules = AirspaceRules::default();
        let bus = MessageBus::new();
        let stop_flag = Arc::new(AtomicBool::new(false));

        let load_report = scenario::load_scenario(&config.scenario, &rules)
            .with_context(|| format!("loading scenario {}", config.scenario.display()))?;
        for (line, err) in &load_report.rejected {
            tracing::warn!(line, error = %err, "scenario row rejected");
        }
        tracing::info!(
            accepted = load_report.accepted(),
            rejected = load_report.rejected.len(),
            "scenario loaded"
        );
        if load_report.rows.is_empty() {
            bail!("scenario contains no usable aircraft");
        }

        let radar = Arc::new(RadarTracker::new(rules.clone(), bus.sender("RADAR")));
        let detector = Arc::new(ViolationDetector::new(rules.clone(), bus.sender("DETECTOR")));
        if let Some(lookahead) = config.lookahead_secs {
            detector.set_lookahead(lookahead);
        }
        let display = Arc::new(RadarDisplay::new(rules.clone()));
        let history = Arc::new(HistoryLogger::new(&config.history_log, config.history_period));
        if !history.is_operational() {
            bail!("unable to open history log {}", history.path().display());
        }

        let (console_input, input_rx) = crossbeam_channel::bounded(crate::console::INPUT_QUEUE_CAP);
        let console = Arc::new(OperatorConsole::new(
            rules.clone(),
            bus.sender("CONSOLE"),
            bus.reply_receiver(),
            Arc::clone(&display),
            Arc::clone(&stop_flag),
            input_rx,
        ));

        let bus_rx = bus.receiver();
        let reply_tx = bus.reply_sender("ORCHESTRATOR");
        let mut orchestrator = Self {
            rules,
            bus,
            stop_flag,
            aircraft: HashMap::new(),
            radar,
            detector,
            display,
            history,
            console,
            console_input,
            bus_rx,
            reply_tx,
            runners: Vec::new(),
            started_at: Instant::now(),
            last_metrics: Instant::now(),
            metrics: Metrics::default(),
            load_report,
            config,
        };

        let rows = std::mem::take(&mut orchestrator.load_report.rows);
        for row in &rows {
            orchestrator.spawn_aircraft(row)?;
        }
        orchestrator.load_report.rows = rows;

        Ok(orchestrator)
    }

    fn spawn_aircraft(&mut self, row: &scenario::ScenarioRow) -> Result<()> {
        let aircraft = Aircraft::new(
            row.callsign.clone(),
            row.position,
            row.velocity,
            self.rules.clone(),
            self.config.aircraft_period,
        )?;
        self.radar.add(aircraft.handle());
        self.detector.add(aircraft.handle());
        self.aircraft.insert(row.callsign.clone(), aircraft);
        Ok(())
    }

    pub fn active_aircraft(&self) -> usize {
        self.aircraft.len()
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// The bus endpoints, e.g. for scripted command injection.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn console(&self) -> &Arc<OperatorConsole> {
        &self.console
    }

    pub fn snapshot_of(&self, callsign: &str) -> Option<atc_core::AircraftState> {
        self.aircraft.get(callsign).map(|a| a.snapshot())
    }

    /// Shared stop flag; flipping it ends `run`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_flag)
    }

    /// Feed a console line programmatically (testing and scripted runs).
    pub fn inject_console_line(&self, line: &str) {
        let _ = self.console_input.send(line.to_string());
    }

    /// Start every periodic task: aircraft first, then surveillance, then
    /// the operator-facing sinks.
    pub fn start(&mut self) {
        for aircraft in self.aircraft.values_mut() {
            aircraft.start();
        }

        let mut radar_runner =
            PeriodicRunner::new("radar", self.config.radar_period, TaskPriority::Radar);
        let radar = Arc::clone(&self.radar);
        radar_runner.start(move || {
            radar.tick(clock::monotonic_ms());
            Ok(())
        });

        let mut detector_runner = PeriodicRunner::new(
            "detector",
            self.config.detector_period,
            TaskPriority::Detector,
        );
        self.detector.attach_period(detector_runner.period());
        let detector = Arc::clone(&self.detector);
        detector_runner.start(move || {
            detector.tick(clock::monotonic_ms());
            Ok(())
        });

        let mut history_runner =
            PeriodicRunner::new("history", self.config.history_period, TaskPriority::History);
        let history = Arc::clone(&self.history);
        history_runner.start(move || {
            history.tick();
            Ok(())
        });

        // runners stop in push order at shutdown: history, display, console,
        // detector, radar
        self.runners.push(history_runner);

        // interactive surfaces stay off in headless runs
        if !self.config.headless {
            let mut display_runner =
                PeriodicRunner::new("display", self.config.display_period, TaskPriority::Display);
            self.display.attach_period(display_runner.period());
            let display = Arc::clone(&self.display);
            display_runner.start(move || {
                display.tick();
                Ok(())
            });
            self.runners.push(display_runner);

            let mut console_runner =
                PeriodicRunner::new("console", self.config.console_period, TaskPriority::Console);
            let console = Arc::clone(&self.console);
            console_runner.start(move || {
                console.tick();
                Ok(())
            });
            self.runners.push(console_runner);
        }

        self.runners.push(detector_runner);
        self.runners.push(radar_runner);

        tracing::info!(
            aircraft = self.aircraft.len(),
            tasks = self.runners.len(),
            "system started"
        );
    }

    /// Route stdin into the console queue and SIGINT/SIGTERM onto the stop
    /// flag. Called once, from the binary only.
    pub fn install_io(&self) {
        if !self.config.headless {
            println!("{}", crate::console::WELCOME);
            print!("{}", crate::console::PROMPT);
            use std::io::Write;
            let _ = std::io::stdout().flush();
            OperatorConsole::spawn_stdin_reader(self.console_input.clone());
        }

        let flag = Arc::clone(&self.stop_flag);
        if let Err(err) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!(error = %err, "signal handler not installed");
        }
    }

    /// Main control loop: drain the bus, keep the sinks fed, reap exited
    /// aircraft, report metrics. Returns once the stop flag is set.
    pub fn run(&mut self) {
        tracing::info!("entering control loop");
        while !self.stop_flag.load(Ordering::SeqCst) {
            self.step();
        }
        self.shutdown();
    }

    /// One outer-loop iteration (~100 ms).
    pub fn step(&mut self) {
        match self.bus_rx.receive(self.config.outer_loop_timeout) {
            Ok(Some(envelope)) => {
                self.handle_message(envelope.message);
                // drain whatever else arrived in this window
                while let Some(envelope) = self.bus_rx.try_receive() {
                    self.handle_message(envelope.message);
                }
            }
            Ok(None) => {}
            Err(_) => {
                tracing::error!("message bus closed, initiating shutdown");
                self.stop_flag.store(true, Ordering::SeqCst);
                return;
            }
        }

        self.reap_exited_aircraft();
        self.publish_picture();

        if self.last_metrics.elapsed() >= self.config.metrics_period {
            self.report_metrics();
            self.last_metrics = Instant::now();
        }
    }

    fn handle_message(&mut self, message: Message) {
        match message {
            Message::Command(command) => {
                self.metrics.commands_processed += 1;
                self.dispatch_command(command);
            }
            Message::Alert(alert) => {
                self.metrics.alerts_received += 1;
                self.display.push_alert(alert.description.clone());
            }
            Message::PositionUpdate(_) => {
                self.metrics.position_updates += 1;
            }
            Message::StatusRequest { target } => {
                let text = match target.as_deref() {
                    None | Some("SYSTEM") => self.system_status(),
                    Some(callsign) => self.aircraft_status(callsign),
                };
                self.reply(StatusData {
                    target_id: target.unwrap_or_else(|| "SYSTEM".into()),
                    text,
                    at: clock::monotonic_ms(),
                });
            }
            Message::StatusResponse(_) => {
                // replies belong on the reply queue; nothing to do here
            }
        }
    }

    /// Apply one controller command to the addressed aircraft and send the
    /// outcome back toward the console.
    fn dispatch_command(&mut self, command: CommandData) {
        let target_id = command.target_id.clone();

        if command.verb == CommandVerb::Status {
            let text = if target_id == "SYSTEM" {
                self.system_status()
            } else {
                self.aircraft_status(&target_id)
            };
            self.reply(StatusData {
                target_id,
                text,
                at: clock::monotonic_ms(),
            });
            return;
        }

        let Some(aircraft) = self.aircraft.get(&target_id) else {
            self.reply(StatusData {
                target_id: target_id.clone(),
                text: format!("Error: unknown aircraft {target_id}"),
                at: clock::monotonic_ms(),
            });
            return;
        };

        let param = command.params.first().cloned().unwrap_or_default();
        let (applied, what) = match command.verb {
            CommandVerb::Altitude => match param.parse::<f64>() {
                Ok(feet) => (aircraft.update_altitude(feet), format!("altitude {feet:.0}")),
                Err(_) => (false, format!("altitude {param:?}")),
            },
            CommandVerb::Speed => match param.parse::<f64>() {
                Ok(speed) => (aircraft.update_speed(speed), format!("speed {speed:.0}")),
                Err(_) => (false, format!("speed {param:?}")),
            },
            CommandVerb::Heading => match param.parse::<f64>() {
                Ok(deg) => (aircraft.update_heading(deg), format!("heading {deg:.0}")),
                Err(_) => (false, format!("heading {param:?}")),
            },
            CommandVerb::Emergency => {
                let on = param.eq_ignore_ascii_case("ON");
                if on {
                    aircraft.declare_emergency();
                } else {
                    aircraft.cancel_emergency();
                }
                (true, format!("emergency {}", if on { "ON" } else { "OFF" }))
            }
            CommandVerb::Status => unreachable!("handled above"),
        };

        let text = if applied {
            format!("{target_id}: {what} acknowledged")
        } else {
            format!("Error: {target_id}: {what} rejected, state unchanged")
        };
        self.reply(StatusData {
            target_id,
            text,
            at: clock::monotonic_ms(),
        });
    }

    fn reply(&self, status: StatusData) {
        if self.reply_tx.send(Message::StatusResponse(status)).is_err() {
            tracing::debug!("reply queue closed");
        }
    }

    /// Push the current picture to the display and history sinks and apply
    /// detector alert bands onto the aircraft records.
    fn publish_picture(&mut self) {
        let states: Vec<_> = self.aircraft.values().map(|a| a.snapshot()).collect();

        for (callsign, level) in self.detector.alert_levels() {
            if let Some(aircraft) = self.aircraft.get(&callsign) {
                aircraft.set_alert_level(level);
            }
        }

        self.display.push_frame(DisplayFrame {
            aircraft: states.clone(),
            violations: self.detector.current_violations(),
            predictions: self.detector.predicted_violations(clock::monotonic_ms()),
        });
        self.history.update_states(states);
    }

    /// Drop aircraft whose update task confirmed the exit and stopped.
    fn reap_exited_aircraft(&mut self) {
        let exited: Vec<String> = self
            .aircraft
            .iter()
            .filter(|(_, a)| !a.is_active())
            .map(|(callsign, _)| callsign.clone())
            .collect();

        for callsign in exited {
            tracing::info!(callsign = %callsign, "aircraft left the airspace, releasing");
            self.radar.remove(&callsign);
            self.detector.remove(&callsign);
            if let Some(mut aircraft) = self.aircraft.remove(&callsign) {
                aircraft.stop();
            }
        }
    }

    fn system_status(&self) -> String {
        let mut text = format!(
            "=== ATC system status ===\n\
             uptime: {} s\n\
             active aircraft: {}\n\
             position updates: {}\n\
             violation checks: {}\n\
             violations detected: {}\n\
             alerts: {}\n\
             commands processed: {}\n\
             console commands: {}\n\
             history entries: {} ({})",
            self.started_at.elapsed().as_secs(),
            self.aircraft.len(),
            self.metrics.position_updates,
            self.detector.checks_performed(),
            self.detector.violations_detected(),
            self.metrics.alerts_received,
            self.metrics.commands_processed,
            self.console.processed_commands(),
            self.history.entries_written(),
            if self.history.is_operational() {
                "operational"
            } else {
                "NOT OPERATIONAL"
            },
        );
        for runner in &self.runners {
            let stats = runner.stats();
            text.push_str(&format!(
                "\n{}: priority {}, exec us best/worst/last {}/{}/{}, ticks {}, failures {}",
                runner.name(),
                runner.priority().value(),
                stats.best_us(),
                stats.worst_us(),
                stats.last_us(),
                stats.ticks(),
                stats.failures(),
            ));
        }
        text
    }

    fn aircraft_status(&self, callsign: &str) -> String {
        match self.aircraft.get(callsign) {
            Some(aircraft) => {
                let s = aircraft.snapshot();
                format!(
                    "{}: position ({:.0}, {:.0}, {:.0}) speed {:.1} heading {:.1} status {} alert {} updated {} ms",
                    s.callsign,
                    s.position.x,
                    s.position.y,
                    s.position.z,
                    s.speed(),
                    s.heading,
                    s.status,
                    s.alert_level,
                    s.timestamp,
                )
            }
            None => format!("Error: unknown aircraft {callsign}"),
        }
    }

    fn report_metrics(&self) {
        tracing::info!(
            uptime_s = self.started_at.elapsed().as_secs(),
            active_aircraft = self.aircraft.len(),
            position_updates = self.metrics.position_updates,
            violation_checks = self.detector.checks_performed(),
            violations = self.detector.violations_detected(),
            commands = self.metrics.commands_processed,
            "system metrics"
        );
        for runner in &self.runners {
            tracing::info!(
                task = runner.name(),
                running = runner.is_running(),
                last_us = runner.stats().last_us(),
                worst_us = runner.stats().worst_us(),
                "component status"
            );
        }
    }

    /// Stop everything in reverse priority order within the shutdown
    /// budget. Runners that overrun the deadline are detached.
    pub fn shutdown(&mut self) {
        tracing::info!("initiating system shutdown");
        let deadline = Instant::now() + self.config.shutdown_timeout;

        // runners were pushed lowest-priority first
        for runner in &mut self.runners {
            runner.stop_by(deadline);
        }
        self.runners.clear();

        for aircraft in self.aircraft.values_mut() {
            aircraft.stop_by(deadline);
        }
        self.aircraft.clear();

        tracing::info!("system shutdown complete");
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if !self.runners.is_empty() || !self.aircraft.is_empty() {
            self.shutdown();
        }
    }
}
