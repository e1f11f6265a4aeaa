//! Append-only airspace history log.
//!
//! Writes a timestamped snapshot of every aircraft plus the pairwise
//! separation table at each logging tick. A failed write marks the logger
//! non-operational; the next tick reopens the file instead of logging.

use atc_core::AircraftState;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct HistoryLogger {
    log_period: Duration,
    file: Mutex<LogFile>,
    states: Mutex<Vec<AircraftState>>,
    entries: AtomicU64,
}

struct LogFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl HistoryLogger {
    /// Open `<base>_<YYYYmmdd_HHMMSS>.log` next to `base` and write the
    /// session header. Returns the logger even when the open fails; it will
    /// retry on its ticks, matching the recover-at-runtime policy.
    pub fn new(base: &Path, log_period: Duration) -> Self {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = PathBuf::from(format!("{}_{stamp}.log", base.display()));

        let mut log_file = LogFile { path, writer: None };
        match log_file.open(log_period) {
            Ok(()) => tracing::info!(path = %log_file.path.display(), "history logger initialized"),
            Err(err) => {
                tracing::error!(path = %log_file.path.display(), error = %err, "failed to open history log")
            }
        }

        Self {
            log_period,
            file: Mutex::new(log_file),
            states: Mutex::new(Vec::new()),
            entries: AtomicU64::new(0),
        }
    }

    pub fn is_operational(&self) -> bool {
        self.file.lock().expect("history lock").writer.is_some()
    }

    pub fn path(&self) -> PathBuf {
        self.file.lock().expect("history lock").path.clone()
    }

    pub fn entries_written(&self) -> u64 {
        self.entries.load(Ordering::Relaxed)
    }

    /// Replace the snapshot set the next entry will record.
    pub fn update_states(&self, states: Vec<AircraftState>) {
        *self.states.lock().expect("history lock") = states;
    }

    /// One logging tick: write an entry, or try to get the file back.
    pub fn tick(&self) {
        let states = self.states.lock().expect("history lock").clone();
        let mut file = self.file.lock().expect("history lock");

        if file.writer.is_none() {
            tracing::warn!("history logger not operational, reopening");
            if let Err(err) = file.open(self.log_period) {
                tracing::error!(error = %err, "history log reopen failed");
                return;
            }
        }

        if states.is_empty() {
            return;
        }

        if let Err(err) = file.write_entry(&states) {
            tracing::error!(error = %err, "history write failed, marking non-operational");
            file.writer = None;
            return;
        }
        self.entries.fetch_add(1, Ordering::Relaxed);
    }
}

impl LogFile {
    fn open(&mut self, log_period: Duration) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "=== ATC System History Log ===")?;
        writeln!(writer, "Started at: {}", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(writer, "Logging period: {} ms", log_period.as_millis())?;
        writeln!(writer, "{}", "-".repeat(50))?;
        writer.flush()?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write_entry(&mut self, states: &[AircraftState]) -> std::io::Result<()> {
        let writer = self.writer.as_mut().expect("writer present");

        writeln!(
            writer,
            "\n=== Airspace state at {} ===",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )?;
        writeln!(writer, "Active aircraft: {}", states.len())?;

        for state in states {
            writeln!(
                writer,
                "{}: position ({:.2}, {:.2}, {:.2}) speed {:.2} heading {:.2} status {} timestamp {}",
                state.callsign,
                state.position.x,
                state.position.y,
                state.position.z,
                state.speed(),
                state.heading,
                state.status,
                state.timestamp,
            )?;
        }

        if states.len() > 1 {
            writeln!(writer, "Separation:")?;
            for i in 0..states.len() {
                for j in (i + 1)..states.len() {
                    let h = states[i].position.horizontal_distance(&states[j].position);
                    let v = states[i].position.vertical_distance(&states[j].position);
                    writeln!(
                        writer,
                        "  {} - {}: horizontal {:.1}, vertical {:.1}",
                        states[i].callsign, states[j].callsign, h, v
                    )?;
                }
            }
        }

        writeln!(writer, "{}", "-".repeat(50))?;
        writer.flush()
    }
}
