//! Runtime configuration from the command line and environment.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Command line surface of the simulator binary.
#[derive(Parser, Debug)]
#[command(name = "atc-sim", about = "Soft-real-time air traffic control simulator")]
pub struct Args {
    /// Scenario CSV file (Time,ID,X,Y,Z,SpeedX,SpeedY,SpeedZ)
    #[arg(short, long)]
    pub scenario: PathBuf,

    /// Base path for the history log (timestamp and .log are appended)
    #[arg(long)]
    pub history_log: Option<PathBuf>,

    /// Conflict prediction window in seconds (clamped to at most 300)
    #[arg(long)]
    pub lookahead: Option<u32>,

    /// Run without operator console and radar display
    #[arg(long)]
    pub headless: bool,
}

/// Resolved settings for one run. Environment variables (`ATC_HISTORY_LOG`,
/// `ATC_LOOKAHEAD`) fill anything the command line left unset.
#[derive(Debug, Clone)]
pub struct Config {
    pub scenario: PathBuf,
    pub history_log: PathBuf,
    pub lookahead_secs: Option<u32>,
    pub headless: bool,

    pub aircraft_period: Duration,
    pub radar_period: Duration,
    pub detector_period: Duration,
    pub display_period: Duration,
    pub history_period: Duration,
    pub console_period: Duration,
    pub outer_loop_timeout: Duration,
    pub metrics_period: Duration,
    pub shutdown_timeout: Duration,
}

impl Config {
    pub fn from_args(args: Args) -> Self {
        let history_log = args
            .history_log
            .or_else(|| std::env::var("ATC_HISTORY_LOG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("atc_history"));
        let lookahead_secs = args
            .lookahead
            .or_else(|| std::env::var("ATC_LOOKAHEAD").ok().and_then(|v| v.parse().ok()));

        Self {
            scenario: args.scenario,
            history_log,
            lookahead_secs,
            headless: args.headless,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenario: PathBuf::new(),
            history_log: PathBuf::from("atc_history"),
            lookahead_secs: None,
            headless: false,
            aircraft_period: Duration::from_secs(1),
            radar_period: Duration::from_secs(1),
            detector_period: Duration::from_secs(1),
            display_period: Duration::from_secs(5),
            history_period: Duration::from_secs(30),
            console_period: Duration::from_millis(100),
            outer_loop_timeout: Duration::from_millis(100),
            metrics_period: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_override_defaults() {
        let args = Args::parse_from([
            "atc-sim",
            "--scenario",
            "demo.csv",
            "--lookahead",
            "120",
            "--headless",
        ]);
        let config = Config::from_args(args);
        assert_eq!(config.scenario, PathBuf::from("demo.csv"));
        assert_eq!(config.lookahead_secs, Some(120));
        assert!(config.headless);
        assert_eq!(config.history_period, Duration::from_secs(30));
    }
}
