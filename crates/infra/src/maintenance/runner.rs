use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use super::scheduler::{MaintenanceTick, TickReport};

/// Config for the background maintenance runner.
#[derive(Debug, Clone)]
pub struct MaintenanceRunner {
    pub interval: Duration,
    pub name: String,
}

impl Default for MaintenanceRunner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            name: "stockhold-maintenance".to_string(),
        }
    }
}

/// Runtime counters of a runner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    pub ticks_run: u64,
    pub ticks_with_failures: u64,
    pub orders_expired: u64,
    pub holds_released: u64,
    pub orders_escalated: u64,
    pub orders_reminded: u64,
    pub low_stock_alerts: u64,
}

impl RunnerStats {
    fn record(&mut self, report: &TickReport) {
        self.ticks_run += 1;
        if !report.is_clean() {
            self.ticks_with_failures += 1;
        }
        self.orders_expired += report.expired.len() as u64;
        self.holds_released += report.released_stale.len() as u64;
        self.orders_escalated += report.escalated.len() as u64;
        self.orders_reminded += report.reminded.len() as u64;
        self.low_stock_alerts += report.low_stock_alerts.len() as u64;
    }

    fn record_panic(&mut self) {
        self.ticks_run += 1;
        self.ticks_with_failures += 1;
    }
}

/// Handle for a running maintenance thread (shutdown + trigger hook).
#[derive(Debug)]
pub struct MaintenanceRunnerHandle {
    shutdown: mpsc::Sender<()>,
    trigger: mpsc::SyncSender<()>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<RunnerStats>>,
}

impl MaintenanceRunnerHandle {
    /// Ask for a tick now instead of waiting for the interval.
    ///
    /// Triggers are coalesced: if one is already pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub fn stats(&self) -> RunnerStats {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stop the runner and wait for the in-flight tick to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                warn!("maintenance runner thread panicked");
            }
        }
    }
}

impl MaintenanceRunner {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the runner on a named thread.
    ///
    /// - Schedule: one tick on startup, then every `interval`
    /// - Trigger: `handle.trigger()` requests an extra tick
    /// - Failures: reported by the tick itself; a panicking tick is logged and
    ///   counted, and the loop keeps its schedule
    pub fn spawn<T>(&self, tick: Arc<T>) -> io::Result<MaintenanceRunnerHandle>
    where
        T: MaintenanceTick + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (trigger_tx, trigger_rx) = mpsc::sync_channel::<()>(1);
        let stats = Arc::new(Mutex::new(RunnerStats::default()));

        let cfg = self.clone();
        let thread_stats = stats.clone();
        let join = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || runner_loop(cfg, tick, shutdown_rx, trigger_rx, thread_stats))?;

        Ok(MaintenanceRunnerHandle {
            shutdown: shutdown_tx,
            trigger: trigger_tx,
            join: Some(join),
            stats,
        })
    }
}

fn runner_loop<T>(
    cfg: MaintenanceRunner,
    tick: Arc<T>,
    shutdown_rx: mpsc::Receiver<()>,
    trigger_rx: mpsc::Receiver<()>,
    stats: Arc<Mutex<RunnerStats>>,
) where
    T: MaintenanceTick + ?Sized,
{
    info!(runner = %cfg.name, interval_ms = cfg.interval.as_millis() as u64, "maintenance runner started");

    let mut next_tick = Instant::now() + cfg.interval;
    let mut pending = true; // run once on startup

    loop {
        if pending {
            pending = false;
            match panic::catch_unwind(AssertUnwindSafe(|| tick.run_tick())) {
                Ok(report) => stats.lock().unwrap_or_else(PoisonError::into_inner).record(&report),
                Err(payload) => {
                    error!(runner = %cfg.name, panic = panic_message(&*payload), "maintenance tick panicked");
                    stats.lock().unwrap_or_else(PoisonError::into_inner).record_panic();
                }
            }
        }

        // Shutdown has priority; a dropped handle also stops the loop.
        let wait = next_tick
            .saturating_duration_since(Instant::now())
            .min(Duration::from_millis(250));
        match shutdown_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        if now >= next_tick {
            pending = true;
            // Keep a stable cadence even if a tick ran long.
            while next_tick <= now {
                next_tick += cfg.interval;
            }
        }

        while trigger_rx.try_recv().is_ok() {
            pending = true;
        }
    }

    info!(runner = %cfg.name, "maintenance runner stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTick {
        runs: AtomicUsize,
    }

    impl MaintenanceTick for CountingTick {
        fn run_tick(&self) -> TickReport {
            self.runs.fetch_add(1, Ordering::SeqCst);
            TickReport::default()
        }
    }

    /// Panics on its first run, then behaves.
    #[derive(Default)]
    struct PanicsOnceTick {
        runs: AtomicUsize,
    }

    impl MaintenanceTick for PanicsOnceTick {
        fn run_tick(&self) -> TickReport {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("stock level read blew up");
            }
            TickReport::default()
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn runs_on_startup_and_on_trigger() {
        let tick = Arc::new(CountingTick::default());
        let handle = MaintenanceRunner::new(Duration::from_secs(3600))
            .with_name("test-maintenance")
            .spawn(tick.clone())
            .unwrap();

        assert!(wait_for(|| tick.runs.load(Ordering::SeqCst) == 1));

        handle.trigger();
        assert!(wait_for(|| tick.runs.load(Ordering::SeqCst) == 2));
        assert!(wait_for(|| handle.stats().ticks_run == 2));

        handle.shutdown();
        assert_eq!(tick.runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn interval_drives_repeated_ticks() {
        let tick = Arc::new(CountingTick::default());
        let handle = MaintenanceRunner::new(Duration::from_millis(20))
            .spawn(tick.clone())
            .unwrap();

        assert!(wait_for(|| tick.runs.load(Ordering::SeqCst) >= 3));
        handle.shutdown();
    }

    #[test]
    fn panicking_tick_is_counted_and_the_loop_keeps_running() {
        let tick = Arc::new(PanicsOnceTick::default());
        let handle = MaintenanceRunner::new(Duration::from_secs(3600))
            .spawn(tick.clone())
            .unwrap();

        assert!(wait_for(|| handle.stats().ticks_with_failures == 1));

        handle.trigger();
        assert!(wait_for(|| tick.runs.load(Ordering::SeqCst) == 2));
        assert!(wait_for(|| handle.stats().ticks_run == 2));

        let stats = handle.stats();
        assert_eq!(stats.ticks_with_failures, 1);
        handle.shutdown();
    }
}
