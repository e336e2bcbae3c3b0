//! Verbena Executor
//!
//! Runs a flow's ordered actions against the shared store: claims the
//! target resource, moves the flow record through its state machine via
//! CAS updates, and compensates completed actions when a later one
//! fails. Lock release is out of scope here — the watcher owns it.

mod error;
mod executor;

pub use error::ExecutorError;
pub use executor::{ExecutionReport, FlowExecutor};
