//! Command and telemetry link to a remotely controlled airboat over UDP.

pub mod control;
pub mod link;
pub mod runtime;
pub mod sim;

pub use control::{LinkConfig, LinkEvent, VehicleClient};
pub use link::{Command, LinkError, Telemetry};
