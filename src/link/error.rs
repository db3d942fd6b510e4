//! Error taxonomy shared by the session, exchange and control layers.

use std::io;

/// Errors surfaced by the link.
///
/// Connection-affecting variants (`NotConnected`, `Io`) leave the session
/// disconnected. `Timeout` and `Decode` belong to a single telemetry cycle
/// and never change the connection state.
#[derive(Debug)]
pub enum LinkError {
    /// Invalid host/port or configuration value.
    Configuration(String),
    /// Operation attempted while the session has no open channel.
    NotConnected,
    /// Channel open, transmit or receive failure other than a timeout.
    Io(io::Error),
    /// No datagram arrived within the receive timeout.
    Timeout,
    /// Telemetry payload could not be parsed.
    Decode(String),
    /// The worker pool no longer accepts jobs.
    ShutDown,
    /// The worker queue is full; the session itself is unaffected.
    Busy,
}

impl LinkError {
    /// True for errors that force (or stem from) a disconnected session.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, LinkError::NotConnected | LinkError::Io(_))
    }
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            LinkError::NotConnected => write!(f, "UDP session is not connected"),
            LinkError::Io(e) => write!(f, "Channel error: {}", e),
            LinkError::Timeout => write!(f, "Timed out waiting for a reply"),
            LinkError::Decode(msg) => write!(f, "Malformed payload: {}", msg),
            LinkError::ShutDown => write!(f, "Link is shutting down"),
            LinkError::Busy => write!(f, "Link is busy, request dropped"),
        }
    }
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LinkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        LinkError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_classification() {
        assert!(LinkError::NotConnected.is_connection_error());
        assert!(LinkError::Io(io::Error::other("boom")).is_connection_error());
        assert!(!LinkError::Timeout.is_connection_error());
        assert!(!LinkError::Decode("x".into()).is_connection_error());
        assert!(!LinkError::Configuration("x".into()).is_connection_error());
        assert!(!LinkError::Busy.is_connection_error());
        assert!(!LinkError::ShutDown.is_connection_error());
    }

    #[test]
    fn test_display_includes_cause() {
        let e = LinkError::from(io::Error::other("socket gone"));
        assert_eq!(e.to_string(), "Channel error: socket gone");
    }
}
