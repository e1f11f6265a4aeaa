//! Periodic task runner.
//!
//! Every subsystem runs its tick loop on a dedicated thread driven by a
//! [`PeriodicRunner`]: execute, measure, sleep until the period boundary.
//! The between-tick sleep doubles as the stop signal wait, so `stop()` can
//! interrupt a sleeping runner immediately while an in-flight tick always
//! runs to completion.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Scheduler priority hints, highest first. On hosts without real-time
/// scheduling these are recorded and surfaced in status output only; the
/// numeric ladder mirrors a hard-real-time deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TaskPriority {
    Console = 10,
    History = 12,
    Display = 14,
    Aircraft = 16,
    Detector = 18,
    Radar = 20,
}

impl TaskPriority {
    pub fn value(&self) -> i32 {
        *self as i32
    }
}

/// Execution-time statistics for one runner, readable from any thread.
#[derive(Debug, Default)]
pub struct ExecStats {
    best_us: AtomicU64,
    worst_us: AtomicU64,
    last_us: AtomicU64,
    ticks: AtomicU64,
    failures: AtomicU64,
}

impl ExecStats {
    fn record(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.last_us.store(us, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.best_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |best| {
                (best == 0 || us < best).then_some(us)
            })
            .ok();
        self.worst_us.fetch_max(us, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn best_us(&self) -> u64 {
        self.best_us.load(Ordering::Relaxed)
    }

    pub fn worst_us(&self) -> u64 {
        self.worst_us.load(Ordering::Relaxed)
    }

    pub fn last_us(&self) -> u64 {
        self.last_us.load(Ordering::Relaxed)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Shared handle to a runner's period. Writes take effect no later than the
/// next sleep boundary.
#[derive(Debug, Clone)]
pub struct PeriodHandle(Arc<AtomicU64>);

impl PeriodHandle {
    pub fn new(period: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(period.as_millis() as u64)))
    }

    pub fn set(&self, period: Duration) {
        self.0.store(period.as_millis().max(1) as u64, Ordering::Relaxed);
    }

    pub fn get(&self) -> Duration {
        Duration::from_millis(self.0.load(Ordering::Relaxed))
    }
}

/// Shared handle a tick callback can use to request its own runner to stop
/// at the next tick boundary.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<std::sync::atomic::AtomicBool>);

impl StopHandle {
    fn new() -> Self {
        Self(Arc::new(std::sync::atomic::AtomicBool::new(false)))
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn stop_requested(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Drives a tick callback at a nominal period on a dedicated thread.
pub struct PeriodicRunner {
    name: String,
    priority: TaskPriority,
    period: PeriodHandle,
    stop: StopHandle,
    stats: Arc<ExecStats>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl PeriodicRunner {
    /// Create an idle runner. `start` spawns the thread.
    pub fn new(name: impl Into<String>, period: Duration, priority: TaskPriority) -> Self {
        Self {
            name: name.into(),
            priority,
            period: PeriodHandle::new(period),
            stop: StopHandle::new(),
            stats: Arc::new(ExecStats::default()),
            stop_tx: None,
            thread: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub fn period(&self) -> PeriodHandle {
        self.period.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stats(&self) -> Arc<ExecStats> {
        Arc::clone(&self.stats)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Spawn the tick loop. Idempotent: calling `start` on a running runner
    /// is a no-op. A tick returning `Err` is logged and counted; the loop
    /// continues at the next period boundary.
    pub fn start<F>(&mut self, mut execute: F)
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        if self.is_running() {
            return;
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let name = self.name.clone();
        let period = self.period.clone();
        let stop = self.stop.clone();
        let stats = Arc::clone(&self.stats);

        tracing::debug!(
            task = %name,
            period_ms = period.get().as_millis() as u64,
            priority = self.priority.value(),
            "starting periodic task"
        );

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(&name, period, stop, stats, stop_rx, &mut execute))
            .expect("spawn periodic task thread");

        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
    }

    /// Signal termination and wait for the thread to join. The in-flight
    /// tick runs to completion; after `stop` returns no further tick runs.
    pub fn stop(&mut self) {
        self.stop.request_stop();
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::error!(task = %self.name, "periodic task panicked");
            }
        }
    }

    /// Signal termination and wait until `deadline` for the thread to
    /// finish. A runner that does not finish in time is detached and left to
    /// die with the process.
    pub fn stop_by(&mut self, deadline: Instant) -> bool {
        self.stop.request_stop();
        self.stop_tx.take();
        let Some(handle) = self.thread.take() else {
            return true;
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(task = %self.name, "shutdown deadline exceeded, detaching task");
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        if handle.join().is_err() {
            tracing::error!(task = %self.name, "periodic task panicked");
        }
        true
    }
}

impl Drop for PeriodicRunner {
    fn drop(&mut self) {
        self.stop.request_stop();
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<F>(
    name: &str,
    period: PeriodHandle,
    stop: StopHandle,
    stats: Arc<ExecStats>,
    stop_rx: Receiver<()>,
    execute: &mut F,
) where
    F: FnMut() -> anyhow::Result<()>,
{
    let mut last_overrun_log: Option<Instant> = None;

    while !stop.stop_requested() {
        let t0 = Instant::now();

        if let Err(err) = execute() {
            stats.record_failure();
            tracing::warn!(task = %name, error = %err, "tick failed");
        }
        stats.record(t0.elapsed());

        if stop.stop_requested() {
            break;
        }

        let current_period = period.get();
        let next = t0 + current_period;
        let now = Instant::now();
        if now >= next {
            // Overrun: begin the next tick immediately, log at most 1/s.
            let log_due =
                last_overrun_log.map_or(true, |at| now.duration_since(at) >= Duration::from_secs(1));
            if log_due {
                tracing::warn!(
                    task = %name,
                    period_ms = current_period.as_millis() as u64,
                    exec_us = stats.last_us(),
                    "tick overran its period"
                );
                last_overrun_log = Some(now);
            }
            continue;
        }

        // The sleep is the stop-signal wait: a message or a disconnect wakes
        // the runner for immediate termination.
        match stop_rx.recv_timeout(next - now) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    tracing::debug!(task = %name, ticks = stats.ticks(), "periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_ticks_and_records_stats() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut runner =
            PeriodicRunner::new("test-tick", Duration::from_millis(10), TaskPriority::Display);
        let c = Arc::clone(&count);
        runner.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        thread::sleep(Duration::from_millis(100));
        runner.stop();

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 3, "expected several ticks, got {ticks}");
        assert_eq!(runner.stats().ticks(), ticks as u64);
    }

    #[test]
    fn stop_prevents_further_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut runner =
            PeriodicRunner::new("test-stop", Duration::from_millis(5), TaskPriority::Display);
        let c = Arc::clone(&count);
        runner.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        thread::sleep(Duration::from_millis(30));
        runner.stop();
        let after_stop = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn start_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut runner =
            PeriodicRunner::new("test-idem", Duration::from_millis(5), TaskPriority::Display);
        let c = Arc::clone(&count);
        runner.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // second start must not spawn a second loop
        runner.start(|| Ok(()));

        thread::sleep(Duration::from_millis(40));
        runner.stop();
        assert_eq!(runner.stats().ticks(), count.load(Ordering::SeqCst) as u64);
    }

    #[test]
    fn failing_ticks_are_counted_not_fatal() {
        let mut runner =
            PeriodicRunner::new("test-fail", Duration::from_millis(5), TaskPriority::Display);
        runner.start(|| anyhow::bail!("induced failure"));

        thread::sleep(Duration::from_millis(40));
        runner.stop();
        assert!(runner.stats().failures() >= 2);
        assert_eq!(runner.stats().failures(), runner.stats().ticks());
    }

    #[test]
    fn callback_can_request_its_own_stop() {
        let mut runner =
            PeriodicRunner::new("test-self-stop", Duration::from_millis(5), TaskPriority::Aircraft);
        let stop = runner.stop_handle();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        runner.start(move || {
            if c.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                stop.request_stop();
            }
            Ok(())
        });

        thread::sleep(Duration::from_millis(80));
        assert!(!runner.is_running());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        runner.stop();
    }

    #[test]
    fn set_period_takes_effect_between_ticks() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut runner =
            PeriodicRunner::new("test-period", Duration::from_millis(200), TaskPriority::Detector);
        let period = runner.period();
        let c = Arc::clone(&count);
        runner.start(move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // shrink the period while the runner sleeps out the first long one
        period.set(Duration::from_millis(5));
        thread::sleep(Duration::from_millis(300));
        runner.stop();
        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 5, "period change never applied, ticks = {ticks}");
    }
}
