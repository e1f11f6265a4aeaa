//! Monotonic run clock.
//!
//! All state timestamps, track ages and cooldowns are measured in
//! milliseconds since the first call in the process. Wall-clock time is used
//! only for human-facing output and never for scheduling decisions.

use std::sync::OnceLock;
use std::time::Instant;

static RUN_EPOCH: OnceLock<Instant> = OnceLock::new();

/// The instant the run clock was first read.
pub fn run_epoch() -> Instant {
    *RUN_EPOCH.get_or_init(Instant::now)
}

/// Monotonic milliseconds since the run epoch.
pub fn monotonic_ms() -> u64 {
    run_epoch().elapsed().as_millis() as u64
}

/// Convert an instant into run-clock milliseconds.
pub fn ms_at(instant: Instant) -> u64 {
    instant.saturating_duration_since(run_epoch()).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_clock_is_monotonic() {
        let a = monotonic_ms();
        let b = monotonic_ms();
        assert!(b >= a);
    }

    #[test]
    fn ms_at_maps_future_instants_forward() {
        let epoch = run_epoch();
        let later = epoch + std::time::Duration::from_millis(1234);
        assert_eq!(ms_at(later), 1234);
    }
}
