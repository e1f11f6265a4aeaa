//! Operator console: textual command parsing and the periodic task that
//! drains operator input.
//!
//! A dedicated reader thread feeds raw lines into a bounded queue; the
//! console's periodic tick parses and routes them. Aircraft commands travel
//! over the bus to the orchestrator, display commands act on the display
//! directly, and EXIT flips the process stop flag.

use atc_core::scenario::valid_callsign;
use atc_core::AirspaceRules;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use thiserror::Error;

use crate::bus::{BusReceiver, BusSender, CommandData, CommandVerb, Message};
use crate::display::RadarDisplay;

/// Input lines queued between the reader thread and the console tick.
pub const INPUT_QUEUE_CAP: usize = 50;
/// Commands remembered for the HISTORY listing.
const HISTORY_CAP: usize = 20;
/// Log a processing-time summary every Nth command.
const PERF_LOG_EVERY: u64 = 100;

const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub const PROMPT: &str = "ATC> ";

pub const WELCOME: &str = "Air Traffic Control operator console. Type HELP for commands.";

/// A validated operator command.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Altitude { callsign: String, feet: f64 },
    Speed { callsign: String, value: f64 },
    Heading { callsign: String, degrees: f64 },
    Emergency { callsign: String, enable: bool },
    Status { callsign: Option<String> },
    Track { callsign: Option<String> },
    DisplayRate { seconds: u64 },
    Pause,
    Resume,
    Help { topic: Option<String> },
    Exit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command {0:?}, type HELP for a list")]
    Unknown(String),
    #[error("{0} requires {1}")]
    MissingParameter(&'static str, &'static str),
    #[error("invalid value {0:?} for {1}")]
    InvalidNumber(String, &'static str),
    #[error("{0}")]
    OutOfRange(String),
    #[error("invalid callsign {0:?}")]
    BadCallsign(String),
}

/// Parse one operator line. Verbs are case-insensitive; parameters are
/// range-checked here so a malformed command never reaches the bus.
pub fn parse_command(line: &str, rules: &AirspaceRules) -> Result<ConsoleCommand, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(verb) = tokens.first() else {
        return Err(ParseError::Empty);
    };

    let verb = verb.to_ascii_uppercase();
    match verb.as_str() {
        "ALTITUDE" | "ALT" => {
            let callsign = require_callsign(&tokens, 1, "ALTITUDE", "<id> <feet>")?;
            let feet = require_number(&tokens, 2, "ALTITUDE", "<id> <feet>", "altitude")?;
            if !rules.altitude_in_range(feet) {
                return Err(ParseError::OutOfRange(format!(
                    "altitude must be between {:.0} and {:.0} feet",
                    rules.z_min, rules.z_max
                )));
            }
            Ok(ConsoleCommand::Altitude { callsign, feet })
        }
        "SPEED" | "SPD" => {
            let callsign = require_callsign(&tokens, 1, "SPEED", "<id> <units>")?;
            let value = require_number(&tokens, 2, "SPEED", "<id> <units>", "speed")?;
            if !rules.speed_in_range(value) {
                return Err(ParseError::OutOfRange(format!(
                    "speed must be between {:.0} and {:.0}",
                    rules.min_speed, rules.max_speed
                )));
            }
            Ok(ConsoleCommand::Speed { callsign, value })
        }
        "HEADING" | "HDG" => {
            let callsign = require_callsign(&tokens, 1, "HEADING", "<id> <degrees>")?;
            let degrees = require_number(&tokens, 2, "HEADING", "<id> <degrees>", "heading")?;
            if !(0.0..360.0).contains(&degrees) {
                return Err(ParseError::OutOfRange(
                    "heading must be at least 0 and below 360".into(),
                ));
            }
            Ok(ConsoleCommand::Heading { callsign, degrees })
        }
        "EMERGENCY" => {
            let callsign = require_callsign(&tokens, 1, "EMERGENCY", "<id> ON|OFF")?;
            let state = tokens
                .get(2)
                .ok_or(ParseError::MissingParameter("EMERGENCY", "<id> ON|OFF"))?;
            match state.to_ascii_uppercase().as_str() {
                "ON" => Ok(ConsoleCommand::Emergency {
                    callsign,
                    enable: true,
                }),
                "OFF" => Ok(ConsoleCommand::Emergency {
                    callsign,
                    enable: false,
                }),
                other => Err(ParseError::OutOfRange(format!(
                    "emergency state must be ON or OFF, not {other:?}"
                ))),
            }
        }
        "STATUS" => Ok(ConsoleCommand::Status {
            callsign: match tokens.get(1) {
                Some(id) => Some(checked_callsign(id)?),
                None => None,
            },
        }),
        "TRACK" => {
            let target = tokens
                .get(1)
                .ok_or(ParseError::MissingParameter("TRACK", "<id>|NONE"))?;
            if target.eq_ignore_ascii_case("none") {
                Ok(ConsoleCommand::Track { callsign: None })
            } else {
                Ok(ConsoleCommand::Track {
                    callsign: Some(checked_callsign(target)?),
                })
            }
        }
        "DISPLAY" => {
            let seconds = require_number(&tokens, 1, "DISPLAY", "<seconds>", "refresh rate")?;
            if !(1.0..=10.0).contains(&seconds) || seconds.fract() != 0.0 {
                return Err(ParseError::OutOfRange(
                    "display rate must be a whole number of seconds between 1 and 10".into(),
                ));
            }
            Ok(ConsoleCommand::DisplayRate {
                seconds: seconds as u64,
            })
        }
        "PAUSE" => Ok(ConsoleCommand::Pause),
        "RESUME" => Ok(ConsoleCommand::Resume),
        "HELP" => Ok(ConsoleCommand::Help {
            topic: tokens.get(1).map(|t| t.to_ascii_uppercase()),
        }),
        "EXIT" | "QUIT" => Ok(ConsoleCommand::Exit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn checked_callsign(token: &str) -> Result<String, ParseError> {
    let callsign = token.to_ascii_uppercase();
    if valid_callsign(&callsign) {
        Ok(callsign)
    } else {
        Err(ParseError::BadCallsign(token.to_string()))
    }
}

fn require_callsign(
    tokens: &[&str],
    index: usize,
    verb: &'static str,
    usage: &'static str,
) -> Result<String, ParseError> {
    let token = tokens
        .get(index)
        .ok_or(ParseError::MissingParameter(verb, usage))?;
    checked_callsign(token)
}

fn require_number(
    tokens: &[&str],
    index: usize,
    verb: &'static str,
    usage: &'static str,
    what: &'static str,
) -> Result<f64, ParseError> {
    let token = tokens
        .get(index)
        .ok_or(ParseError::MissingParameter(verb, usage))?;
    token
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ParseError::InvalidNumber(token.to_string(), what))
}

/// Help text for all commands or one topic.
pub fn help_text(topic: Option<&str>) -> String {
    const ENTRIES: &[(&str, &str, &str)] = &[
        ("ALTITUDE", "ALTITUDE <id> <feet>", "Set altitude (15000-25000 ft). Example: ALTITUDE AC001 20000"),
        ("SPEED", "SPEED <id> <units>", "Set ground speed (150-500). Example: SPEED AC001 250"),
        ("HEADING", "HEADING <id> <degrees>", "Set heading (0-359). Example: HEADING AC001 90"),
        ("EMERGENCY", "EMERGENCY <id> ON|OFF", "Declare or cancel an emergency. Example: EMERGENCY AC001 ON"),
        ("STATUS", "STATUS [id]", "System status, or one aircraft's status"),
        ("TRACK", "TRACK <id>|NONE", "Focus the display on one aircraft"),
        ("DISPLAY", "DISPLAY <seconds>", "Set display refresh rate (1-10 s)"),
        ("PAUSE", "PAUSE", "Pause display updates"),
        ("RESUME", "RESUME", "Resume display updates"),
        ("HELP", "HELP [command]", "Show this help"),
        ("EXIT", "EXIT", "Shut the system down"),
    ];

    if let Some(topic) = topic {
        for (name, syntax, description) in ENTRIES {
            if *name == topic {
                return format!("{syntax}\n  {description}");
            }
        }
        return format!("no help for {topic:?}; type HELP for the full list");
    }

    let mut text = String::from("Air Traffic Control commands:\n");
    for (_, syntax, description) in ENTRIES {
        text.push_str(&format!("  {syntax:<24} {description}\n"));
    }
    text
}

/// Result of processing one operator line.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub success: bool,
    pub message: String,
}

impl CommandOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// The console subsystem. `tick` runs on its periodic task; the reader
/// thread only moves bytes.
pub struct OperatorConsole {
    rules: AirspaceRules,
    bus: BusSender,
    replies: BusReceiver,
    display: Arc<RadarDisplay>,
    stop_flag: Arc<AtomicBool>,
    input_rx: Receiver<String>,
    history: Mutex<VecDeque<String>>,
    processed: AtomicU64,
    processing_us_total: AtomicU64,
}

impl OperatorConsole {
    pub fn new(
        rules: AirspaceRules,
        bus: BusSender,
        replies: BusReceiver,
        display: Arc<RadarDisplay>,
        stop_flag: Arc<AtomicBool>,
        input_rx: Receiver<String>,
    ) -> Self {
        tracing::info!("operator console initialized");
        Self {
            rules,
            bus,
            replies,
            display,
            stop_flag,
            input_rx,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_CAP)),
            processed: AtomicU64::new(0),
            processing_us_total: AtomicU64::new(0),
        }
    }

    /// Spawn the thread that feeds stdin lines into the bounded input
    /// queue. The reader blocks on stdin and dies with the process; it owns
    /// no state. Lines beyond the queue cap are reported and dropped.
    pub fn spawn_stdin_reader(feeder: Sender<String>) {
        thread::Builder::new()
            .name("console-stdin".into())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match feeder.try_send(line) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            eprintln!("{RED}Error: command queue full, command discarded{RESET}")
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
            })
            .expect("spawn console reader thread");
    }

    pub fn processed_commands(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn history(&self) -> Vec<String> {
        self.history.lock().expect("console lock").iter().cloned().collect()
    }

    /// One console tick: drain pending input, then print any replies the
    /// orchestrator sent back.
    pub fn tick(&self) {
        while let Ok(line) = self.input_rx.try_recv() {
            let outcome = self.process_line(&line);
            if outcome.success {
                if !outcome.message.is_empty() {
                    println!("{}", outcome.message);
                }
            } else {
                println!("{RED}Error: {}{RESET}", outcome.message);
            }
            print!("{PROMPT}");
            use std::io::Write;
            let _ = std::io::stdout().flush();
        }

        while let Some(envelope) = self.replies.try_receive() {
            if let Message::StatusResponse(status) = envelope.message {
                if status.text.starts_with("Error") {
                    println!("{RED}{}{RESET}", status.text);
                } else {
                    println!("{}", status.text);
                }
            }
        }
    }

    /// Parse and route one line, recording history and timing.
    pub fn process_line(&self, line: &str) -> CommandOutcome {
        let started = Instant::now();
        self.remember(line);

        let outcome = match parse_command(line, &self.rules) {
            Ok(command) => self.dispatch(command),
            Err(err) => CommandOutcome::err(err.to_string()),
        };

        let elapsed_us = started.elapsed().as_micros() as u64;
        let count = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.processing_us_total.fetch_add(elapsed_us, Ordering::Relaxed) + elapsed_us;
        if count % PERF_LOG_EVERY == 0 {
            tracing::info!(
                commands = count,
                avg_us = total / count,
                "console processing statistics"
            );
        }

        outcome
    }

    fn dispatch(&self, command: ConsoleCommand) -> CommandOutcome {
        match command {
            ConsoleCommand::Altitude { callsign, feet } => {
                self.send_command(callsign, CommandVerb::Altitude, vec![feet.to_string()])
            }
            ConsoleCommand::Speed { callsign, value } => {
                self.send_command(callsign, CommandVerb::Speed, vec![value.to_string()])
            }
            ConsoleCommand::Heading { callsign, degrees } => {
                self.send_command(callsign, CommandVerb::Heading, vec![degrees.to_string()])
            }
            ConsoleCommand::Emergency { callsign, enable } => self.send_command(
                callsign,
                CommandVerb::Emergency,
                vec![if enable { "ON" } else { "OFF" }.to_string()],
            ),
            ConsoleCommand::Status { callsign } => {
                let target = callsign.unwrap_or_else(|| "SYSTEM".to_string());
                self.send_command(target, CommandVerb::Status, Vec::new())
            }
            ConsoleCommand::Track { callsign } => {
                let message = match &callsign {
                    Some(id) => format!("tracking {id}"),
                    None => "track focus cleared".to_string(),
                };
                self.display.set_focus(callsign);
                CommandOutcome::ok(message)
            }
            ConsoleCommand::DisplayRate { seconds } => {
                self.display.set_refresh_secs(seconds);
                CommandOutcome::ok(format!("display refresh rate set to {seconds} s"))
            }
            ConsoleCommand::Pause => {
                self.display.set_paused(true);
                CommandOutcome::ok("display updates paused, RESUME to continue")
            }
            ConsoleCommand::Resume => {
                self.display.set_paused(false);
                CommandOutcome::ok("display updates resumed")
            }
            ConsoleCommand::Help { topic } => CommandOutcome::ok(help_text(topic.as_deref())),
            ConsoleCommand::Exit => {
                self.stop_flag.store(true, Ordering::SeqCst);
                CommandOutcome::ok("shutting down air traffic control")
            }
        }
    }

    fn send_command(
        &self,
        target_id: String,
        verb: CommandVerb,
        params: Vec<String>,
    ) -> CommandOutcome {
        let sent = self.bus.send(Message::Command(CommandData {
            target_id: target_id.clone(),
            verb,
            params,
        }));
        match sent {
            Ok(()) => CommandOutcome::ok(String::new()),
            Err(_) => CommandOutcome::err(format!("{verb} {target_id}: bus unavailable")),
        }
    }

    fn remember(&self, line: &str) {
        let mut history = self.history.lock().expect("console lock");
        if history.len() == HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AirspaceRules {
        AirspaceRules::default()
    }

    #[test]
    fn parses_mutating_commands_case_insensitively() {
        assert_eq!(
            parse_command("altitude ac001 20000", &rules()),
            Ok(ConsoleCommand::Altitude {
                callsign: "AC001".into(),
                feet: 20_000.0
            })
        );
        assert_eq!(
            parse_command("SPEED AC001 250", &rules()),
            Ok(ConsoleCommand::Speed {
                callsign: "AC001".into(),
                value: 250.0
            })
        );
        assert_eq!(
            parse_command("Hdg AC001 359.5", &rules()),
            Ok(ConsoleCommand::Heading {
                callsign: "AC001".into(),
                degrees: 359.5
            })
        );
        assert_eq!(
            parse_command("emergency AC001 on", &rules()),
            Ok(ConsoleCommand::Emergency {
                callsign: "AC001".into(),
                enable: true
            })
        );
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        assert!(matches!(
            parse_command("ALTITUDE AC001 26000", &rules()),
            Err(ParseError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_command("SPEED AC001 100", &rules()),
            Err(ParseError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_command("HEADING AC001 360", &rules()),
            Err(ParseError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_command("DISPLAY 30", &rules()),
            Err(ParseError::OutOfRange(_))
        ));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(parse_command("   ", &rules()), Err(ParseError::Empty));
        assert!(matches!(
            parse_command("LAND AC001", &rules()),
            Err(ParseError::Unknown(_))
        ));
        assert!(matches!(
            parse_command("SPEED AC001", &rules()),
            Err(ParseError::MissingParameter(..))
        ));
        assert!(matches!(
            parse_command("SPEED AC001 fast", &rules()),
            Err(ParseError::InvalidNumber(..))
        ));
        assert!(matches!(
            parse_command("SPEED A! 200", &rules()),
            Err(ParseError::BadCallsign(_))
        ));
    }

    #[test]
    fn status_and_track_take_optional_targets() {
        assert_eq!(
            parse_command("STATUS", &rules()),
            Ok(ConsoleCommand::Status { callsign: None })
        );
        assert_eq!(
            parse_command("STATUS ac007", &rules()),
            Ok(ConsoleCommand::Status {
                callsign: Some("AC007".into())
            })
        );
        assert_eq!(
            parse_command("TRACK NONE", &rules()),
            Ok(ConsoleCommand::Track { callsign: None })
        );
        assert_eq!(
            parse_command("TRACK AC007", &rules()),
            Ok(ConsoleCommand::Track {
                callsign: Some("AC007".into())
            })
        );
    }

    #[test]
    fn help_lists_every_command() {
        let text = help_text(None);
        for verb in [
            "ALTITUDE", "SPEED", "HEADING", "EMERGENCY", "STATUS", "TRACK", "DISPLAY", "PAUSE",
            "RESUME", "HELP", "EXIT",
        ] {
            assert!(text.contains(verb), "help missing {verb}");
        }
        assert!(help_text(Some("SPEED")).contains("SPEED <id> <units>"));
    }
}
