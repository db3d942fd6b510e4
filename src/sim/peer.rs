//! Simulated vehicle answering on a local UDP socket.
//!
//! Decodes incoming commands, remembers the last steering/speed values and
//! answers status requests with a drifting telemetry reading. Behaviour can
//! be switched at runtime to exercise timeouts and malformed replies.

use rand::Rng;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::link::codec::{self, Command, MAX_PAYLOAD, Telemetry};

/// Poll interval of the peer thread; bounds how long `stop` takes.
const PEER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Battery floor for the drain model (mV).
const EMPTY_CELL_MV: i64 = 3000;

/// How the peer answers a status request.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerBehavior {
    /// Reply with the simulated, drifting reading.
    Responsive,
    /// Reply with the given reading every time.
    Fixed(Telemetry),
    /// Never reply.
    Silent,
    /// Reply with the given raw text.
    Malformed(String),
}

#[derive(Debug)]
struct PeerState {
    behavior: PeerBehavior,
    reply_delay: Duration,
    angle: u8,
    speed: u8,
    telemetry: Telemetry,
    commands_received: usize,
    status_requests: usize,
}

impl PeerState {
    fn new() -> Self {
        Self {
            behavior: PeerBehavior::Responsive,
            reply_delay: Duration::ZERO,
            angle: 90,
            speed: 0,
            telemetry: Telemetry {
                wifi_signal_level: -55,
                battery_voltage_millivolts: 4150,
                latitude: 55_751_244,
                longitude: 37_618_423,
                course_degrees: 0,
            },
            commands_received: 0,
            status_requests: 0,
        }
    }

    fn apply(&mut self, command: &Command) {
        self.commands_received += 1;
        if let Some(angle) = command.angle {
            self.angle = angle;
        }
        if let Some(speed) = command.speed {
            self.speed = speed;
        }
        if command.is_status_request() {
            self.status_requests += 1;
        }
    }

    /// Advance the simulated vehicle by one reporting step.
    fn advance(&mut self, rng: &mut impl Rng) {
        let speed = self.speed as i64;
        let t = &mut self.telemetry;

        t.battery_voltage_millivolts = (t.battery_voltage_millivolts - speed / 10 - 1).max(EMPTY_CELL_MV);

        // Rudder deflection from center turns the heading, scaled by speed.
        let turn = (self.angle as i64 - 90) * speed / 100;
        t.course_degrees = (t.course_degrees + turn).rem_euclid(360);

        let heading = (t.course_degrees as f64).to_radians();
        t.latitude += (heading.cos() * speed as f64) as i64;
        t.longitude += (heading.sin() * speed as f64) as i64;

        t.wifi_signal_level = (-55 + rng.gen_range(-6..=6)).clamp(-90, -30);
    }

    fn reply(&mut self, rng: &mut impl Rng) -> Option<Vec<u8>> {
        match &self.behavior {
            PeerBehavior::Silent => None,
            PeerBehavior::Malformed(text) => Some(text.clone().into_bytes()),
            PeerBehavior::Fixed(telemetry) => Some(codec::encode_telemetry(telemetry)),
            PeerBehavior::Responsive => {
                self.advance(rng);
                Some(codec::encode_telemetry(&self.telemetry))
            }
        }
    }
}

pub struct SimulatedPeer {
    local_addr: SocketAddr,
    state: Arc<Mutex<PeerState>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulatedPeer {
    /// Bind on an ephemeral loopback port.
    pub fn spawn_local() -> io::Result<Self> {
        Self::spawn("127.0.0.1:0")
    }

    pub fn spawn(bind_addr: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_read_timeout(Some(PEER_POLL_INTERVAL))?;
        let local_addr = socket.local_addr()?;

        let state = Arc::new(Mutex::new(PeerState::new()));
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let state = Arc::clone(&state);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name(format!("sim-peer-{}", local_addr.port()))
                .spawn(move || peer_loop(socket, state, running))?
        };

        log::info!("Simulated peer listening on {}", local_addr);
        Ok(Self { local_addr, state, running, handle: Some(handle) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_behavior(&self, behavior: PeerBehavior) {
        self.lock().behavior = behavior;
    }

    pub fn set_reply_delay(&self, delay: Duration) {
        self.lock().reply_delay = delay;
    }

    /// Number of commands decoded so far, status requests included.
    pub fn received_commands(&self) -> usize {
        self.lock().commands_received
    }

    pub fn status_requests(&self) -> usize {
        self.lock().status_requests
    }

    /// Last (angle, speed) applied by a control command.
    pub fn last_control(&self) -> (u8, u8) {
        let state = self.lock();
        (state.angle, state.speed)
    }

    /// Block until at least `count` commands arrived or `timeout` elapsed.
    pub fn wait_for_commands(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.received_commands() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::debug!("Simulated peer on {} stopped", self.local_addr);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PeerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SimulatedPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn peer_loop(socket: UdpSocket, state: Arc<Mutex<PeerState>>, running: Arc<AtomicBool>) {
    let mut rng = rand::thread_rng();
    let mut buffer = [0u8; MAX_PAYLOAD];

    while running.load(Ordering::SeqCst) {
        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => continue,
            Err(e) => {
                log::warn!("Simulated peer receive error: {}", e);
                continue;
            }
        };

        let command = match codec::decode_command(&buffer[..len]) {
            Ok(command) => command,
            Err(e) => {
                log::debug!("Simulated peer ignoring datagram from {}: {}", from, e);
                continue;
            }
        };

        let (reply, delay) = {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.apply(&command);
            let reply = if command.is_status_request() { state.reply(&mut rng) } else { None };
            (reply, state.reply_delay)
        };

        if let Some(reply) = reply {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            if let Err(e) = socket.send_to(&reply, from) {
                log::warn!("Simulated peer failed to reply to {}: {}", from, e);
            }
        }
    }
}
