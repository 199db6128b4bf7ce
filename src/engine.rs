//! Threaded stopwatch engine.
//!
//! The engine wraps a [`StopwatchCore`] behind one mutex and runs a pump thread
//! while the stopwatch is running. The pump samples the clock every
//! `sample_interval_ms` and feeds the reading to the core, which adds the
//! measured delta. Each pump is tagged with a generation; pausing or resetting
//! bumps the generation before returning, so a pump that is mid-sample can no
//! longer apply anything once the call completes.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use timer_core::{format_hms_millis, SampleOutcome, StopwatchCore, TimerState};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;

/// Receives the limit-reached event. Called once per crossing, after the
/// engine has already reset itself, and never with the engine lock held.
pub trait LimitNotifier: Send + Sync {
    fn limit_reached(&self, limit_ms: u64);
}

impl<F> LimitNotifier for F
where
    F: Fn(u64) + Send + Sync,
{
    fn limit_reached(&self, limit_ms: u64) {
        self(limit_ms)
    }
}

/// Point-in-time view published to subscribers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub state: TimerState,
    pub elapsed_ms: u64,
}

impl Snapshot {
    /// Elapsed time as "HH:MM:SS:mmm".
    pub fn display(&self) -> String {
        format_hms_millis(self.elapsed_ms)
    }

    pub fn reset_enabled(&self) -> bool {
        self.state != TimerState::Reset
    }
}

struct Inner {
    core: StopwatchCore,
    generation: u64,
    pump: Option<Sender<()>>,
    observers: Vec<Sender<Snapshot>>,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.core.state(),
            elapsed_ms: self.core.elapsed_ms(),
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.observers.retain(|tx| tx.send(snapshot).is_ok());
    }

    /// Invalidates the current pump and wakes it so it exits.
    fn cancel_pump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(stop) = self.pump.take() {
            let _ = stop.send(());
        }
    }
}

enum PumpStep {
    Continue,
    Stop,
}

struct Shared {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    notifier: Box<dyn LimitNotifier>,
    sample_interval: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes one sample. `generation` is `Some` when called from a pump, which
    /// is then ignored unless it is still the current one.
    fn sample(&self, generation: Option<u64>) -> PumpStep {
        let mut inner = self.lock();
        if generation.is_some_and(|g| g != inner.generation) {
            return PumpStep::Stop;
        }

        let now = self.clock.now_ms();
        match inner.core.sample(now) {
            SampleOutcome::Idle => PumpStep::Stop,
            SampleOutcome::Accumulated { delta_ms } => {
                if delta_ms > 0 {
                    inner.publish();
                }
                PumpStep::Continue
            }
            SampleOutcome::LimitReached { elapsed_ms } => {
                self.limit_reached(inner, elapsed_ms);
                PumpStep::Stop
            }
        }
    }

    /// The core has already reset itself. Stops the pump, publishes, then
    /// notifies with the lock released.
    fn limit_reached(&self, mut inner: MutexGuard<'_, Inner>, elapsed_ms: u64) {
        inner.cancel_pump();
        inner.publish();
        let limit_ms = inner.core.limit_ms();
        drop(inner);

        log::info!("limit of {} ms reached at {} ms, stopwatch reset", limit_ms, elapsed_ms);
        self.notifier.limit_reached(limit_ms);
    }
}

fn pump_thread(shared: Arc<Shared>, generation: u64, stop: Receiver<()>) {
    log::trace!("pump {} started", generation);
    loop {
        match stop.recv_timeout(shared.sample_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if let PumpStep::Stop = shared.sample(Some(generation)) {
            break;
        }
    }
    log::trace!("pump {} exited", generation);
}

pub struct StopwatchEngine {
    shared: Arc<Shared>,
}

impl StopwatchEngine {
    /// Engine sampling the system wall clock.
    pub fn new(config: &EngineConfig, notifier: impl LimitNotifier + 'static) -> Self {
        Self::with_clock(config, Arc::new(SystemClock), notifier)
    }

    pub fn with_clock(
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: impl LimitNotifier + 'static,
    ) -> Self {
        let inner = Inner {
            core: StopwatchCore::new(config.limit_ms),
            generation: 0,
            pump: None,
            observers: Vec::new(),
        };
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                clock,
                notifier: Box::new(notifier),
                sample_interval: config.sample_interval().max(Duration::from_millis(1)),
            }),
        }
    }

    /// Start, pause or resume. Returns the new state.
    pub fn toggle_running(&self) -> TimerState {
        let mut inner = self.shared.lock();
        inner.cancel_pump();

        let now = self.shared.clock.now_ms();
        if inner.core.state() == TimerState::Running {
            if let SampleOutcome::LimitReached { elapsed_ms } = inner.core.pause(now) {
                self.shared.limit_reached(inner, elapsed_ms);
                return TimerState::Reset;
            }
        } else {
            inner.core.start(now);
            let generation = inner.generation;
            inner.pump = self.spawn_pump(generation);
        }

        let state = inner.core.state();
        inner.publish();
        log::debug!("stopwatch {:?} at {} ms", state, inner.core.elapsed_ms());
        state
    }

    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        inner.cancel_pump();
        inner.core.reset();
        inner.publish();
        log::debug!("stopwatch reset");
    }

    /// Samples the clock now on the calling thread and returns the resulting
    /// snapshot. Nothing is added unless running.
    pub fn tick(&self) -> Snapshot {
        self.shared.sample(None);
        self.snapshot()
    }

    pub fn state(&self) -> TimerState {
        self.shared.lock().core.state()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.shared.lock().core.elapsed_ms()
    }

    pub fn limit_ms(&self) -> u64 {
        self.shared.lock().core.limit_ms()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().snapshot()
    }

    /// Subscribes to state and elapsed-time changes. The current snapshot is
    /// delivered first. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> Receiver<Snapshot> {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.shared.lock();
        if tx.send(inner.snapshot()).is_ok() {
            inner.observers.push(tx);
        }
        rx
    }

    fn spawn_pump(&self, generation: u64) -> Option<Sender<()>> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("stopwatch-pump".into())
            .spawn(move || pump_thread(shared, generation, stop_rx));
        match spawned {
            Ok(_) => Some(stop_tx),
            Err(e) => {
                log::error!("can't spawn pump thread: {}", e);
                None
            }
        }
    }
}

impl Drop for StopwatchEngine {
    fn drop(&mut self) {
        self.shared.lock().cancel_pump();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::clock::ManualClock;

    // Long enough that the pump never samples on its own during a test
    const PARKED_INTERVAL_MS: u64 = 3_600_000;

    fn manual_engine(limit_ms: u64) -> (StopwatchEngine, Arc<ManualClock>, Arc<AtomicUsize>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let config = EngineConfig::default()
            .with_limit_ms(limit_ms)
            .with_sample_interval_ms(PARKED_INTERVAL_MS);
        let engine = StopwatchEngine::with_clock(&config, clock.clone(), move |_limit: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (engine, clock, fired)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    #[test]
    fn test_toggle_cycle() {
        let (engine, _clock, _fired) = manual_engine(60_000);
        assert_eq!(engine.state(), TimerState::Reset);
        assert_eq!(engine.toggle_running(), TimerState::Running);
        assert_eq!(engine.toggle_running(), TimerState::Paused);
        assert_eq!(engine.toggle_running(), TimerState::Running);
        assert_eq!(engine.state(), TimerState::Running);
    }

    #[test]
    fn test_reset_from_every_state() {
        let (engine, clock, _fired) = manual_engine(60_000);
        engine.reset();
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });

        engine.toggle_running();
        clock.advance(700);
        engine.tick();
        engine.reset();
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });

        engine.toggle_running();
        clock.advance(700);
        engine.tick();
        engine.toggle_running();
        engine.reset();
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });
    }

    #[test]
    fn test_run_segments_are_additive() {
        let (engine, clock, _fired) = manual_engine(60_000);
        engine.toggle_running();
        clock.advance(1200);
        engine.tick();
        engine.toggle_running();

        clock.advance(30_000);
        engine.tick();
        assert_eq!(engine.elapsed_ms(), 1200);

        engine.toggle_running();
        clock.advance(800);
        engine.tick();
        assert_eq!(engine.elapsed_ms(), 2000);
    }

    #[test]
    fn test_pause_keeps_time_since_last_sample() {
        let (engine, clock, _fired) = manual_engine(60_000);
        engine.toggle_running();
        clock.advance(400);
        assert_eq!(engine.toggle_running(), TimerState::Paused);
        assert_eq!(engine.elapsed_ms(), 400);

        clock.advance(1000);
        engine.toggle_running();
        clock.advance(600);
        engine.tick();
        assert_eq!(engine.elapsed_ms(), 1000);
    }

    #[test]
    fn test_pause_reaching_limit_notifies_and_resets() {
        let (engine, clock, fired) = manual_engine(1000);
        let rx = engine.subscribe();
        engine.toggle_running();
        clock.advance(1500);

        assert_eq!(engine.toggle_running(), TimerState::Reset);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });
        assert!(engine.shared.lock().pump.is_none());

        let last = rx.try_iter().last().unwrap();
        assert_eq!(last, Snapshot { state: TimerState::Reset, elapsed_ms: 0 });
    }

    #[test]
    fn test_backward_clock_never_decreases_elapsed() {
        let (engine, clock, _fired) = manual_engine(60_000);
        engine.toggle_running();
        clock.advance(500);
        engine.tick();
        clock.rewind(5_000);
        engine.tick();
        assert_eq!(engine.elapsed_ms(), 500);
        clock.advance(100);
        engine.tick();
        assert_eq!(engine.elapsed_ms(), 600);
    }

    #[test]
    fn test_limit_scenario() {
        let (engine, clock, fired) = manual_engine(1000);
        engine.toggle_running();

        clock.advance(400);
        assert_eq!(engine.tick(), Snapshot { state: TimerState::Running, elapsed_ms: 400 });

        clock.advance(400);
        assert_eq!(engine.tick(), Snapshot { state: TimerState::Running, elapsed_ms: 800 });

        clock.advance(400);
        assert_eq!(engine.tick(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });

        // Another tick past the limit without running again stays quiet
        clock.advance(2000);
        engine.tick();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.state(), TimerState::Reset);
    }

    #[test]
    fn test_notifier_receives_limit() {
        let clock = Arc::new(ManualClock::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = EngineConfig::default()
            .with_limit_ms(250)
            .with_sample_interval_ms(PARKED_INTERVAL_MS);
        let engine = StopwatchEngine::with_clock(&config, clock.clone(), move |limit_ms: u64| {
            sink.lock().unwrap().push(limit_ms);
        });
        engine.toggle_running();
        clock.advance(300);
        engine.tick();
        assert_eq!(*seen.lock().unwrap(), vec![250]);
    }

    #[test]
    fn test_stale_pump_cannot_apply_after_reset() {
        let (engine, clock, _fired) = manual_engine(60_000);
        engine.toggle_running();
        let stale = engine.shared.lock().generation;

        engine.reset();
        engine.toggle_running();
        clock.advance(900);

        assert!(matches!(engine.shared.sample(Some(stale)), PumpStep::Stop));
        assert_eq!(engine.elapsed_ms(), 0);

        let current = engine.shared.lock().generation;
        assert!(matches!(engine.shared.sample(Some(current)), PumpStep::Continue));
        assert_eq!(engine.elapsed_ms(), 900);
    }

    #[test]
    fn test_only_one_pump_registered() {
        let (engine, _clock, _fired) = manual_engine(60_000);
        engine.toggle_running();
        engine.toggle_running();
        assert!(engine.shared.lock().pump.is_none());
        engine.toggle_running();
        assert!(engine.shared.lock().pump.is_some());
        engine.reset();
        assert!(engine.shared.lock().pump.is_none());
    }

    #[test]
    fn test_subscribers_see_changes() {
        let (engine, clock, _fired) = manual_engine(60_000);
        let rx = engine.subscribe();
        assert_eq!(rx.recv().unwrap(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });

        engine.toggle_running();
        assert_eq!(rx.recv().unwrap(), Snapshot { state: TimerState::Running, elapsed_ms: 0 });

        // A tick with no elapsed time publishes nothing
        engine.tick();
        clock.advance(42);
        engine.tick();
        assert_eq!(rx.recv().unwrap(), Snapshot { state: TimerState::Running, elapsed_ms: 42 });

        engine.reset();
        let last = rx.recv().unwrap();
        assert_eq!(last, Snapshot { state: TimerState::Reset, elapsed_ms: 0 });
        assert!(!last.reset_enabled());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let (engine, _clock, _fired) = manual_engine(60_000);
        drop(engine.subscribe());
        engine.toggle_running();
        assert!(engine.shared.lock().observers.is_empty());
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = Snapshot { state: TimerState::Paused, elapsed_ms: 61_005 };
        assert_eq!(snapshot.display(), "00:01:01:005");
        assert!(snapshot.reset_enabled());
    }

    #[test]
    fn test_pump_accumulates_and_fires_limit() {
        let clock = Arc::new(ManualClock::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let config = EngineConfig::default().with_limit_ms(1000).with_sample_interval_ms(1);
        let engine = StopwatchEngine::with_clock(&config, clock.clone(), move |_limit: u64| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        engine.toggle_running();
        clock.advance(600);
        assert!(wait_until(|| engine.elapsed_ms() == 600));

        clock.advance(600);
        assert!(wait_until(|| fired.load(Ordering::SeqCst) == 1));
        assert_eq!(engine.snapshot(), Snapshot { state: TimerState::Reset, elapsed_ms: 0 });

        clock.advance(5000);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(engine.elapsed_ms(), 0);
    }

    #[test]
    fn test_paused_pump_stops_adding() {
        let clock = Arc::new(ManualClock::new(0));
        let config = EngineConfig::default().with_sample_interval_ms(1);
        let engine = StopwatchEngine::with_clock(&config, clock.clone(), |_limit: u64| {});

        engine.toggle_running();
        clock.advance(300);
        assert!(wait_until(|| engine.elapsed_ms() == 300));
        engine.toggle_running();

        clock.advance(300);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.elapsed_ms(), 300);
        assert_eq!(engine.state(), TimerState::Paused);
    }
}
