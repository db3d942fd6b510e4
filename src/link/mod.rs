//! Command/telemetry protocol core.
//!
//! - `codec`: JSON encoding of commands, strict and fallback telemetry decoding
//! - `session`: the single UDP channel to the vehicle
//! - `exchange`: fire-and-forget sends and request/reply telemetry
//! - `error`: the shared error type

pub mod codec;
pub mod error;
pub mod exchange;
pub mod session;

pub use codec::{Command, Telemetry};
pub use error::LinkError;
pub use exchange::Exchange;
pub use session::{PeerAddress, Session};
