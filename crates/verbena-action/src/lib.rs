//! Verbena Action
//!
//! The minimal unit of work inside a flow. An action exposes a stable
//! name, a typed parameter payload, validation, `run`, and a
//! compensating `rollback`. Concrete actions (provider calls, the flow
//! watcher) live in other crates and are dispatched by name through the
//! [`ActionRegistry`].

mod action;
mod context;
mod error;
mod registry;

pub use action::{Action, DynAction};
pub use context::RunContext;
pub use error::ActionError;
pub use registry::{ActionRegistry, RegistryError};
