//! Presentation-facing side of the link.
//!
//! [`VehicleClient`] is what a UI talks to: it opens and closes the session,
//! dispatches sends and telemetry requests to background workers and reports
//! progress as [`LinkEvent`]s.

pub mod client;
pub mod command;
pub mod config;
pub mod events;

pub use client::VehicleClient;
pub use command::{ConsoleCommand, ControlState};
pub use config::LinkConfig;
pub use events::{EventSink, LinkEvent, StatusLine};
