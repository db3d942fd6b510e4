//! Events handed from the link to the presentation layer.

use chrono::{DateTime, Local};
use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use std::fmt;

use crate::link::Telemetry;

/// Depth of the event channel. Events are dropped, not queued without bound,
/// when the presentation layer stops draining.
pub const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Human-readable status line.
    Status(StatusLine),
    /// Fresh reading.
    Telemetry(Telemetry),
    /// A telemetry cycle finished without a usable reading.
    NoTelemetry,
    /// Session opened (`true`) or lost/closed (`false`).
    ConnectionChanged(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusLine {
    pub at: DateTime<Local>,
    pub message: String,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

impl fmt::Display for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Status(line) => write!(f, "{}", line),
            LinkEvent::Telemetry(t) => write!(
                f,
                "wifi {} dBm ({:.0}%) | battery {:.2} V ({:.0}%) | lat {} | lon {} | course {}°",
                t.wifi_signal_level,
                t.wifi_signal_percent(),
                t.battery_voltage_volts(),
                t.battery_percent(),
                t.latitude,
                t.longitude,
                t.course_degrees
            ),
            LinkEvent::NoTelemetry => write!(f, "no telemetry this cycle"),
            LinkEvent::ConnectionChanged(true) => write!(f, "connected"),
            LinkEvent::ConnectionChanged(false) => write!(f, "disconnected"),
        }
    }
}

/// Cloneable producer side of the event channel.
#[derive(Clone)]
pub struct EventSink {
    tx: Sender<LinkEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, Receiver<LinkEvent>) {
        let (tx, rx) = bounded(EVENT_CHANNEL_SIZE);
        (EventSink { tx }, rx)
    }

    pub fn status(&self, message: impl Into<String>) {
        self.publish(LinkEvent::Status(StatusLine { at: Local::now(), message: message.into() }));
    }

    pub fn telemetry(&self, reading: Option<Telemetry>) {
        self.publish(match reading {
            Some(t) => LinkEvent::Telemetry(t),
            None => LinkEvent::NoTelemetry,
        });
    }

    pub fn connection(&self, connected: bool) {
        self.publish(LinkEvent::ConnectionChanged(connected));
    }

    fn publish(&self, event: LinkEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(event)) => log::warn!("Event channel full, dropping {:?}", event),
        }
    }
}
