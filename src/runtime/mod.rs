//! Background execution: the worker pool, completion handles and the
//! telemetry poller.

pub mod pending;
pub mod poller;
pub mod worker_pool;

pub use pending::{Completer, Pending};
pub use poller::{PollSchedule, Poller, PollerState, TelemetryObserver};
pub use worker_pool::WorkerPool;
