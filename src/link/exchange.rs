//! Request/reply exchanges over a [`Session`].
//!
//! Only one telemetry request may be outstanding at a time. Replies carry no
//! sequence number, so the first datagram that arrives after a request is
//! taken as its answer; callers must not overlap `request_telemetry` calls.

use std::sync::Arc;

use super::codec::{self, Command, Telemetry};
use super::error::LinkError;
use super::session::Session;

pub struct Exchange {
    session: Arc<Session>,
}

impl Exchange {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Fire-and-forget send. Nothing is transmitted when disconnected.
    pub fn send_command(&self, command: &Command) -> Result<(), LinkError> {
        if !self.session.is_connected() {
            return Err(LinkError::NotConnected);
        }
        let payload = codec::encode_command(command);
        self.session.send_raw(&payload)?;
        log::debug!("Command sent: {}", String::from_utf8_lossy(&payload));
        Ok(())
    }

    /// Send a status request and wait for one reply.
    ///
    /// `Ok(None)` means no usable reading this cycle: the peer stayed silent
    /// for the receive timeout, or the reply could not be decoded even by the
    /// fallback scraper. Neither case touches the connection state.
    pub fn request_telemetry(&self) -> Result<Option<Telemetry>, LinkError> {
        self.send_command(&Command::status_request())?;

        let reply = match self.session.receive_raw() {
            Ok(reply) => reply,
            Err(LinkError::Timeout) => {
                log::debug!("No telemetry reply within {:?}", self.session.receive_timeout());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        log::debug!("Telemetry reply: {}", String::from_utf8_lossy(&reply));
        Ok(codec::decode_telemetry_lenient(&reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{PeerBehavior, SimulatedPeer};
    use std::net::UdpSocket;
    use std::time::{Duration, Instant};

    fn exchange_for(peer: &SimulatedPeer, timeout: Duration) -> Exchange {
        let session = Arc::new(Session::with_receive_timeout(timeout));
        session.configure("127.0.0.1", peer.local_addr().port()).unwrap();
        Exchange::new(session)
    }

    #[test]
    fn test_disconnected_guard() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        let exchange = exchange_for(&peer, Duration::from_millis(200));

        assert!(matches!(exchange.send_command(&Command::control(Some(90), None)), Err(LinkError::NotConnected)));
        assert!(matches!(exchange.request_telemetry(), Err(LinkError::NotConnected)));

        exchange.session().open().unwrap();
        exchange.session().close();
        assert!(matches!(exchange.send_command(&Command::control(None, Some(10))), Err(LinkError::NotConnected)));
        assert!(matches!(exchange.request_telemetry(), Err(LinkError::NotConnected)));

        thread_settle();
        assert_eq!(peer.received_commands(), 0);
    }

    #[test]
    fn test_send_command_reaches_peer() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        let exchange = exchange_for(&peer, Duration::from_millis(200));
        exchange.session().open().unwrap();

        exchange.send_command(&Command::control(Some(135), Some(60))).unwrap();
        assert!(peer.wait_for_commands(1, Duration::from_secs(2)));
        assert_eq!(peer.last_control(), (135, 60));
    }

    #[test]
    fn test_request_telemetry_matches_echoed_reply() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        let expected = Telemetry {
            wifi_signal_level: -48,
            battery_voltage_millivolts: 3987,
            latitude: 59938630,
            longitude: 30314130,
            course_degrees: 45,
        };
        peer.set_behavior(PeerBehavior::Fixed(expected));
        peer.set_reply_delay(Duration::from_millis(10));

        let exchange = exchange_for(&peer, Duration::from_millis(1000));
        exchange.session().open().unwrap();
        assert_eq!(exchange.request_telemetry().unwrap(), Some(expected));
    }

    #[test]
    fn test_silent_peer_times_out_then_recovers() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        peer.set_behavior(PeerBehavior::Silent);
        let exchange = exchange_for(&peer, Duration::from_millis(300));
        exchange.session().open().unwrap();

        let started = Instant::now();
        assert_eq!(exchange.request_telemetry().unwrap(), None);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(exchange.session().is_connected());

        peer.set_behavior(PeerBehavior::Responsive);
        assert!(exchange.request_telemetry().unwrap().is_some());
    }

    #[test]
    fn test_malformed_reply_uses_fallback() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        peer.set_behavior(PeerBehavior::Malformed(r#"{"battery_voltage":3700,"course":"#.into()));
        let exchange = exchange_for(&peer, Duration::from_millis(500));
        exchange.session().open().unwrap();

        let telemetry = exchange.request_telemetry().unwrap().unwrap();
        assert_eq!(telemetry.battery_voltage_millivolts, 3700);
        assert_eq!(telemetry.course_degrees, 0);
        assert_eq!(telemetry.latitude, 0);
    }

    #[test]
    fn test_unusable_reply_is_no_reading() {
        let peer = SimulatedPeer::spawn_local().unwrap();
        peer.set_behavior(PeerBehavior::Malformed("ERR".into()));
        let exchange = exchange_for(&peer, Duration::from_millis(500));
        exchange.session().open().unwrap();

        assert_eq!(exchange.request_telemetry().unwrap(), None);
        assert!(exchange.session().is_connected());
    }

    #[test]
    fn test_any_reply_answers_the_outstanding_request() {
        // A bare socket stands in for the peer and answers with a reading
        // from "another" request; arrival order is the only correlation.
        let raw_peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw_peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let session = Arc::new(Session::with_receive_timeout(Duration::from_millis(1000)));
        session.configure("127.0.0.1", raw_peer.local_addr().unwrap().port()).unwrap();
        let exchange = Exchange::new(session);
        exchange.session().open().unwrap();

        let responder = std::thread::spawn(move || {
            let mut buf = [0u8; 64];
            let (len, from) = raw_peer.recv_from(&mut buf).unwrap();
            assert_eq!(&buf[..len], br#"{"status":true}"#);
            let reply = codec::encode_telemetry(&Telemetry { course_degrees: 181, ..Default::default() });
            raw_peer.send_to(&reply, from).unwrap();
        });

        let telemetry = exchange.request_telemetry().unwrap().unwrap();
        assert_eq!(telemetry.course_degrees, 181);
        responder.join().unwrap();
    }

    fn thread_settle() {
        std::thread::sleep(Duration::from_millis(100));
    }
}
