//! Executor errors.

use verbena_action::ActionError;
use verbena_store::FlowState;

/// Errors that can occur while executing a flow.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
  /// The flow record does not exist.
  #[error("flow not found: {0}")]
  FlowNotFound(String),

  /// Another flow holds the live lock on the target resource.
  #[error("resource {res_id} ({res_type}) is locked by another flow")]
  ResourceBusy { res_id: String, res_type: String },

  /// A flow action names something the registry does not know.
  #[error("unknown action '{0}'")]
  UnknownAction(String),

  /// The flow could not be claimed for execution; a concurrent writer
  /// moved it first.
  #[error("flow {flow_id} is in state {state:?}, cannot start execution")]
  Conflict { flow_id: String, state: FlowState },

  /// Execution stopped because the flow was cancelled.
  #[error("flow {0} was cancelled")]
  Cancelled(String),

  /// An action failed; completed actions have been rolled back.
  #[error("action '{name}' failed")]
  ActionFailed {
    name: String,
    #[source]
    source: ActionError,
  },

  /// A storage error occurred.
  #[error(transparent)]
  Store(#[from] verbena_store::Error),
}
