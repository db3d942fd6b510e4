//! Local stand-in for the vehicle, used by tests and by the console's
//! `--simulate` mode.

pub mod peer;

pub use peer::{PeerBehavior, SimulatedPeer};
