//! Recurring telemetry refresh.
//!
//! A timer thread ticks at a fixed rate and dispatches one telemetry request
//! per tick to the worker pool. Ticks are no-ops while the session is
//! disconnected, and are skipped while the previous poll is still waiting for
//! its reply, so the poller never has two requests outstanding.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::worker_pool::WorkerPool;
use crate::link::{Exchange, LinkError, Telemetry};

/// Receives the outcome of every dispatched poll: a reading, `None` for a
/// missed cycle, or the error that ended it.
pub type TelemetryObserver = Arc<dyn Fn(Result<Option<Telemetry>, LinkError>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub initial_delay: Duration,
}

struct PollTimer {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct Poller {
    exchange: Arc<Exchange>,
    pool: Arc<WorkerPool>,
    timer: Mutex<Option<PollTimer>>,
    // Shared across restarts so a new timer waits for the old one's request.
    in_flight: Arc<AtomicBool>,
}

impl Poller {
    pub fn new(exchange: Arc<Exchange>, pool: Arc<WorkerPool>) -> Self {
        Self { exchange, pool, timer: Mutex::new(None), in_flight: Arc::new(AtomicBool::new(false)) }
    }

    pub fn state(&self) -> PollerState {
        match *self.timer.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(_) => PollerState::Running,
            None => PollerState::Idle,
        }
    }

    /// Start ticking. A timer that is already running is cancelled first.
    pub fn start(&self, schedule: PollSchedule, observer: TelemetryObserver) -> Result<(), LinkError> {
        if schedule.interval.is_zero() {
            return Err(LinkError::Configuration("poll interval must be positive".into()));
        }

        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            log::debug!("Poller restarted, cancelling previous timer");
            Self::cancel(previous);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let cycle = PollCycle {
            exchange: Arc::clone(&self.exchange),
            pool: Arc::clone(&self.pool),
            observer,
            in_flight: Arc::clone(&self.in_flight),
        };
        let handle = thread::Builder::new()
            .name("telemetry-poller".to_string())
            .spawn(move || timer_thread(schedule, stop_rx, cycle))?;

        log::info!(
            "Telemetry polling every {:?} (first poll in {:?})",
            schedule.interval,
            schedule.initial_delay
        );
        *timer = Some(PollTimer { stop_tx, handle });
        Ok(())
    }

    /// Cancel the timer. Safe to call when idle.
    pub fn stop(&self) {
        let previous = self.timer.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(previous) = previous {
            Self::cancel(previous);
            log::info!("Telemetry polling stopped");
        }
    }

    fn cancel(timer: PollTimer) {
        // Dropping the sender wakes the timer thread out of its wait.
        drop(timer.stop_tx);
        let _ = timer.handle.join();
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollCycle {
    exchange: Arc<Exchange>,
    pool: Arc<WorkerPool>,
    observer: TelemetryObserver,
    in_flight: Arc<AtomicBool>,
}

impl PollCycle {
    fn tick(&self) {
        if !self.exchange.session().is_connected() {
            log::trace!("Poll tick skipped: not connected");
            return;
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Poll tick skipped: previous request still outstanding");
            return;
        }

        let exchange = Arc::clone(&self.exchange);
        let observer = Arc::clone(&self.observer);
        let in_flight = Arc::clone(&self.in_flight);
        let dispatched = self.pool.execute(move || {
            let result = exchange.request_telemetry();
            in_flight.store(false, Ordering::SeqCst);
            observer(result);
        });

        if let Err(e) = dispatched {
            self.in_flight.store(false, Ordering::SeqCst);
            log::debug!("Poll tick not dispatched: {}", e);
        }
    }
}

fn timer_thread(schedule: PollSchedule, stop_rx: Receiver<()>, cycle: PollCycle) {
    let mut next = Instant::now() + schedule.initial_delay;
    loop {
        match stop_rx.recv_deadline(next) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        cycle.tick();

        // Fixed rate; ticks missed while the thread was descheduled collapse
        // into one.
        next += schedule.interval;
        let now = Instant::now();
        if next < now {
            next = now + schedule.interval;
        }
    }
}
