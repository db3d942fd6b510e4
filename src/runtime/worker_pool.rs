//! Fixed pool of named worker threads fed from a bounded job queue.

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::link::LinkError;

/// Queued jobs per worker before `execute` reports back-pressure.
const JOBS_PER_WORKER: usize = 16;

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(name: &str, workers: usize) -> Result<Self, LinkError> {
        if workers == 0 {
            return Err(LinkError::Configuration("worker pool needs at least one worker".into()));
        }

        let (tx, rx) = bounded::<Job>(workers * JOBS_PER_WORKER);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let rx = rx.clone();
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || Self::worker_thread(rx, in_flight))?;
            handles.push(handle);
        }

        log::debug!("Worker pool '{}' started with {} worker(s)", name, workers);
        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            handles: Mutex::new(handles),
            in_flight,
        })
    }

    fn worker_thread(receiver: Receiver<Job>, in_flight: Arc<AtomicUsize>) {
        // Exits once every sender is gone and the queue is drained.
        while let Ok(job) = receiver.recv() {
            // A panicking job must not take its worker down with it.
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
                log::warn!("Job panicked on {}: {}", thread::current().name().unwrap_or("worker"), panic_message(&*payload));
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Queue a job without blocking the caller.
    pub fn execute<F>(&self, job: F) -> Result<(), LinkError>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            return Err(LinkError::ShutDown);
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                log::warn!("Worker pool '{}' queue full, job rejected", self.name);
                Err(LinkError::Busy)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Err(LinkError::ShutDown)
            }
        }
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Stop accepting jobs and wait up to `grace` for workers to finish.
    ///
    /// Workers still busy after the grace period are detached; they exit on
    /// their own once their current job returns. Returns true when every
    /// worker was joined.
    pub fn shutdown(&self, grace: Duration) -> bool {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().unwrap_or_else(PoisonError::into_inner).drain(..).collect();
        if handles.is_empty() {
            return true;
        }

        let deadline = Instant::now() + grace;
        while handles.iter().any(|h| !h.is_finished()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let mut detached = 0;
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            log::warn!("Worker pool '{}': {} worker(s) still busy after {:?}, detaching", self.name, detached, grace);
            false
        } else {
            log::debug!("Worker pool '{}' stopped", self.name);
            true
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Only releases the queue; joining is left to an explicit shutdown.
        self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
