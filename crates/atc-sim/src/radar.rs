//! Radar tracker: fuses aircraft ground truth into noisy tracks.
//!
//! Two cadences ride on one periodic task: the primary surveillance scan
//! (position fix with jitter, every 4 s) and the secondary interrogation
//! (transponder check and position publication, every 1 s). Track quality
//! climbs on accepted scans and decays over silence; only tracks above the
//! quality floor are reported downstream.

use atc_core::{AircraftState, AirspaceRules, Position, RadarTrack};
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::aircraft::AircraftHandle;
use crate::bus::{BusSender, Message};

/// Primary surveillance scan interval.
pub const PRIMARY_SCAN_MS: u64 = 4_000;
/// Secondary (transponder) interrogation interval.
pub const SECONDARY_SCAN_MS: u64 = 1_000;
/// Quality added per accepted primary scan.
const QUALITY_SCAN_BONUS: i32 = 10;
/// Quality lost per tick once a track has gone stale.
const QUALITY_DECAY: i32 = 5;
/// Silence after which a track counts as stale.
const STALE_AFTER_MS: u64 = 1_000;
/// Tracks older than this are dropped outright.
pub const MAX_TRACK_AGE_MS: u64 = 10_000;
/// Minimum quality for a track to be reported.
pub const MIN_TRACK_QUALITY: i32 = 30;
/// Uniform position error applied per axis on a primary scan.
const SCAN_JITTER: f64 = 50.0;
/// Emit a track-table report every Nth update tick.
const TRACK_REPORT_EVERY: u64 = 10;

#[derive(Debug, Error, PartialEq)]
#[error("aircraft not tracked: {0}")]
pub struct NotTracked(pub String);

/// The radar subsystem. `tick` is driven by a periodic runner; everything
/// else may be called from any thread.
pub struct RadarTracker {
    aircraft: DashMap<String, AircraftHandle>,
    tracks: DashMap<String, RadarTrack>,
    bus: BusSender,
    rules: AirspaceRules,
    last_primary: AtomicU64,
    last_secondary: AtomicU64,
    primary_scans: AtomicU64,
    secondary_scans: AtomicU64,
    update_ticks: AtomicU64,
}

impl RadarTracker {
    pub fn new(rules: AirspaceRules, bus: BusSender) -> Self {
        tracing::info!("radar system initialized");
        Self {
            aircraft: DashMap::new(),
            tracks: DashMap::new(),
            bus,
            rules,
            last_primary: AtomicU64::new(0),
            last_secondary: AtomicU64::new(0),
            primary_scans: AtomicU64::new(0),
            secondary_scans: AtomicU64::new(0),
            update_ticks: AtomicU64::new(0),
        }
    }

    /// Put an aircraft under surveillance.
    pub fn add(&self, handle: AircraftHandle) {
        tracing::info!(callsign = %handle.callsign(), "aircraft added to radar tracking");
        self.aircraft.insert(handle.callsign().to_string(), handle);
    }

    /// Drop an aircraft and its track.
    pub fn remove(&self, callsign: &str) {
        self.aircraft.remove(callsign);
        if self.tracks.remove(callsign).is_some() {
            tracing::info!(callsign, "aircraft removed from radar tracking");
        }
    }

    /// All reportable tracks (quality at or above the floor).
    pub fn tracks(&self) -> Vec<AircraftState> {
        self.tracks
            .iter()
            .filter(|t| t.quality >= MIN_TRACK_QUALITY)
            .map(|t| t.state.clone())
            .collect()
    }

    /// The fused state of one tracked aircraft.
    pub fn state_of(&self, callsign: &str) -> Result<AircraftState, NotTracked> {
        self.tracks
            .get(callsign)
            .filter(|t| t.quality >= MIN_TRACK_QUALITY)
            .map(|t| t.state.clone())
            .ok_or_else(|| NotTracked(callsign.to_string()))
    }

    pub fn is_tracked(&self, callsign: &str) -> bool {
        self.state_of(callsign).is_ok()
    }

    pub fn primary_scan_count(&self) -> u64 {
        self.primary_scans.load(Ordering::Relaxed)
    }

    pub fn secondary_scan_count(&self) -> u64 {
        self.secondary_scans.load(Ordering::Relaxed)
    }

    /// One radar tick at monotonic time `now_ms`. Runs whichever scans are
    /// due, then decays and cleans the track table.
    pub fn tick(&self, now_ms: u64) {
        if self.due(&self.last_primary, now_ms, PRIMARY_SCAN_MS) {
            self.primary_scan(now_ms);
        }
        if self.due(&self.last_secondary, now_ms, SECONDARY_SCAN_MS) {
            self.secondary_interrogation(now_ms);
        }
        self.decay_tracks(now_ms);
        self.cleanup_tracks(now_ms);

        let ticks = self.update_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks % TRACK_REPORT_EVERY == 0 {
            self.log_track_report();
        }
    }

    /// Check-and-stamp for a cadence: true when `interval_ms` has elapsed
    /// since the stored timestamp (or on the very first call).
    fn due(&self, last: &AtomicU64, now_ms: u64, interval_ms: u64) -> bool {
        let prev = last.load(Ordering::Relaxed);
        if prev == 0 || now_ms.saturating_sub(prev) >= interval_ms {
            last.store(now_ms.max(1), Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Primary surveillance: sample every aircraft's ground truth, apply
    /// per-axis jitter, and accept returns that validate against the
    /// airspace. A rejected return for one aircraft never affects the rest.
    fn primary_scan(&self, now_ms: u64) {
        let scan_no = self.primary_scans.fetch_add(1, Ordering::Relaxed) + 1;
        let mut rng = rand::thread_rng();

        for entry in self.aircraft.iter() {
            let truth = entry.value().snapshot();
            let detected = Position {
                x: truth.position.x + rng.gen_range(-SCAN_JITTER..=SCAN_JITTER),
                y: truth.position.y + rng.gen_range(-SCAN_JITTER..=SCAN_JITTER),
                z: truth.position.z + rng.gen_range(-SCAN_JITTER..=SCAN_JITTER),
            };

            if !self.rules.contains(&detected) {
                tracing::debug!(
                    callsign = %truth.callsign,
                    "radar return outside airspace, discarded"
                );
                continue;
            }

            let mut fused = truth.clone();
            fused.position = detected;

            let mut track = self
                .tracks
                .entry(truth.callsign.clone())
                .or_insert_with(|| RadarTrack::new(fused.clone(), now_ms));
            track.state = fused;
            track.last_update = now_ms;
            track.quality = (track.quality + QUALITY_SCAN_BONUS).min(100);
        }

        tracing::debug!(scan = scan_no, tracks = self.tracks.len(), "primary radar scan complete");
    }

    /// Secondary surveillance: interrogate transponders. Aircraft still
    /// under surveillance respond, which refreshes their track; reportable
    /// tracks are published on the bus as fused (jittered) states.
    fn secondary_interrogation(&self, now_ms: u64) {
        self.secondary_scans.fetch_add(1, Ordering::Relaxed);

        for mut track in self.tracks.iter_mut() {
            let callsign = track.key().clone();
            match self.aircraft.get(&callsign) {
                Some(handle) => {
                    // transponder replies with identity and altitude; carry
                    // the live kinematics onto the fused state
                    let truth = handle.snapshot();
                    track.state.velocity = truth.velocity;
                    track.state.heading = truth.heading;
                    track.state.status = truth.status;
                    track.state.timestamp = truth.timestamp;
                    track.transponder_ok = true;
                    track.last_update = now_ms;
                }
                None => {
                    track.transponder_ok = false;
                }
            }

            if track.quality >= MIN_TRACK_QUALITY {
                if self.bus.send(Message::PositionUpdate(track.state.clone())).is_err() {
                    tracing::debug!("bus closed, position update dropped");
                }
            }
        }
    }

    /// Age-based quality decay for silent tracks.
    fn decay_tracks(&self, now_ms: u64) {
        for mut track in self.tracks.iter_mut() {
            if track.age_ms(now_ms) >= STALE_AFTER_MS {
                track.quality = (track.quality - QUALITY_DECAY).max(0);
            }
        }
    }

    /// Drop tracks that aged out or fully lost confidence.
    fn cleanup_tracks(&self, now_ms: u64) {
        self.tracks.retain(|callsign, track| {
            let stale = track.age_ms(now_ms) > MAX_TRACK_AGE_MS || track.quality <= 0;
            if stale {
                tracing::info!(callsign, quality = track.quality, "removing stale track");
            }
            !stale
        });
    }

    fn log_track_report(&self) {
        tracing::debug!(
            active_tracks = self.tracks.len(),
            primary_scans = self.primary_scan_count(),
            secondary_scans = self.secondary_scan_count(),
            "radar track table"
        );
        for track in self.tracks.iter() {
            tracing::trace!(
                callsign = %track.key(),
                x = track.state.position.x,
                y = track.state.position.y,
                z = track.state.position.z,
                quality = track.quality,
                transponder = track.transponder_ok,
                "track"
            );
        }
    }
}
