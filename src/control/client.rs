//! Client facade for the vehicle link.
//!
//! Owns the session, the worker pool and the telemetry poller. Every network
//! operation runs on the pool; callers get a [`Pending`] handle back
//! immediately and the outcome is also published on the event channel.

use crossbeam::channel::Receiver;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::config::LinkConfig;
use super::events::{EventSink, LinkEvent};
use crate::link::{Command, Exchange, LinkError, PeerAddress, Session, Telemetry};
use crate::runtime::{Pending, PollSchedule, Poller, PollerState, TelemetryObserver, WorkerPool};

pub struct VehicleClient {
    config: LinkConfig,
    session: Arc<Session>,
    exchange: Arc<Exchange>,
    pool: Arc<WorkerPool>,
    poller: Poller,
    sink: EventSink,
    events: Receiver<LinkEvent>,
    shut_down: AtomicBool,
}

impl VehicleClient {
    pub fn new(config: LinkConfig) -> Result<Self, LinkError> {
        config.validate()?;

        let session = Arc::new(Session::with_receive_timeout(config.receive_timeout()));
        session.configure(&config.host, config.port)?;
        let exchange = Arc::new(Exchange::new(Arc::clone(&session)));
        let pool = Arc::new(WorkerPool::new("link-worker", config.workers)?);
        let poller = Poller::new(Arc::clone(&exchange), Arc::clone(&pool));
        let (sink, events) = EventSink::channel();

        Ok(Self { config, session, exchange, pool, poller, sink, events, shut_down: AtomicBool::new(false) })
    }

    /// Receiver for status lines, readings and connection changes.
    pub fn events(&self) -> Receiver<LinkEvent> {
        self.events.clone()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn peer(&self) -> PeerAddress {
        self.session.peer()
    }

    /// Change the peer for the next `open`. Takes the port as typed.
    pub fn configure(&self, host: &str, port: &str) -> Result<(), LinkError> {
        let peer = PeerAddress::parse(host, port)?;
        self.session.configure(&peer.host, peer.port)
    }

    pub fn open(&self) -> Result<bool, LinkError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LinkError::ShutDown);
        }
        let peer = self.session.peer();
        match self.session.open() {
            Ok(connected) => {
                log::info!("Connected to {}", peer);
                self.sink.status(format!("Connected to {}", peer));
                self.sink.connection(true);
                Ok(connected)
            }
            Err(e) => {
                log::warn!("Connection to {} failed: {}", peer, e);
                self.sink.status(format!("Connection failed: {}", e));
                self.sink.connection(false);
                Err(e)
            }
        }
    }

    /// Idempotent; only the first close after an open reports a change.
    pub fn close(&self) {
        if self.session.is_connected() {
            self.session.close();
            log::info!("Disconnected");
            self.sink.status("Disconnected");
            self.sink.connection(false);
        } else {
            self.session.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Send a control update. Fails immediately when disconnected; otherwise
    /// the datagram goes out on a pool worker.
    pub fn send_command(&self, angle: Option<u8>, speed: Option<u8>) -> Pending<Result<(), LinkError>> {
        if !self.session.is_connected() {
            return Pending::ready(Err(LinkError::NotConnected));
        }

        let command = Command::control(angle, speed);
        let (completer, pending) = Pending::channel();
        let exchange = Arc::clone(&self.exchange);
        let sink = self.sink.clone();
        let dispatched = self.pool.execute(move || {
            let result = exchange.send_command(&command);
            match &result {
                Ok(()) => sink.status(format!("Sent: {}", describe(&command))),
                Err(e) => report_failure(&sink, "Command send failed", e),
            }
            completer.complete(result);
        });

        match dispatched {
            Ok(()) => pending,
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// One status request, outside the poller's schedule.
    ///
    /// Replies are matched by arrival order, so this must not race a running
    /// poller; stop polling first.
    pub fn poll_telemetry_once(&self) -> Pending<Result<Option<Telemetry>, LinkError>> {
        if !self.session.is_connected() {
            return Pending::ready(Err(LinkError::NotConnected));
        }

        let (completer, pending) = Pending::channel();
        let exchange = Arc::clone(&self.exchange);
        let sink = self.sink.clone();
        let dispatched = self.pool.execute(move || {
            let result = exchange.request_telemetry();
            report_telemetry(&sink, &result);
            completer.complete(result);
        });

        match dispatched {
            Ok(()) => pending,
            Err(e) => Pending::ready(Err(e)),
        }
    }

    /// Start periodic telemetry with the configured initial delay. Restarts
    /// the schedule if polling is already running.
    pub fn start_polling(&self, interval: Duration) -> Result<(), LinkError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LinkError::ShutDown);
        }
        let schedule = PollSchedule { interval, initial_delay: self.config.poll_schedule().initial_delay };
        let sink = self.sink.clone();
        let observer: TelemetryObserver =
            Arc::new(move |result: Result<Option<Telemetry>, LinkError>| report_telemetry(&sink, &result));
        self.poller.start(schedule, observer)?;
        self.sink.status(format!("Telemetry polling every {}s", interval.as_secs_f32()));
        Ok(())
    }

    pub fn stop_polling(&self) {
        if self.poller.state() == PollerState::Running {
            self.poller.stop();
            self.sink.status("Telemetry polling stopped");
        }
    }

    pub fn polling_state(&self) -> PollerState {
        self.poller.state()
    }

    /// Stop polling, close the session and wait up to the configured grace
    /// period for in-flight work. Returns false if some workers were still
    /// busy and had to be detached. Later calls return true immediately.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return true;
        }
        log::info!("Shutting down link");
        self.poller.stop();
        self.close();
        self.pool.shutdown(self.config.shutdown_grace())
    }
}

impl Drop for VehicleClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn describe(command: &Command) -> String {
    match (command.angle, command.speed) {
        (Some(angle), Some(speed)) => format!("angle={}°, speed={}%", angle, speed),
        (Some(angle), None) => format!("angle={}°", angle),
        (None, Some(speed)) => format!("speed={}%", speed),
        (None, None) => "empty update".to_string(),
    }
}

fn report_failure(sink: &EventSink, context: &str, error: &LinkError) {
    log::warn!("{}: {}", context, error);
    sink.status(format!("{}: {}", context, error));
    // An aborted receive means close/open already ran and reported the change.
    let lost = match error {
        LinkError::Io(e) => e.kind() != io::ErrorKind::ConnectionAborted,
        _ => false,
    };
    if lost {
        sink.connection(false);
    }
}

fn report_telemetry(sink: &EventSink, result: &Result<Option<Telemetry>, LinkError>) {
    match result {
        Ok(reading) => sink.telemetry(*reading),
        Err(e) => report_failure(sink, "Telemetry request failed", e),
    }
}
