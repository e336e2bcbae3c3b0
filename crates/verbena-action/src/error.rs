//! Action errors.

/// Errors that can occur while validating or executing an action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
  /// The parameter payload could not be deserialized or failed
  /// validation. Raised before any state is touched.
  #[error("invalid parameter: {message}")]
  InvalidParameter { message: String },

  /// The action was cancelled by its host.
  #[error("action cancelled")]
  Cancelled,

  /// A polling action gave up waiting for a condition to hold.
  ///
  /// Kept distinct so the host can decide between re-invoking the
  /// action and escalating.
  #[error("wait timeout, flow {flow_id} is still running")]
  WaitTimeout { flow_id: String },

  /// The action's own work failed.
  #[error("action failed: {source}")]
  Failed {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
  },
}

impl ActionError {
  /// Wrap an arbitrary error as an execution failure.
  pub fn failed<E>(source: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    ActionError::Failed {
      source: Box::new(source),
    }
  }

  /// Build an invalid-parameter error from any message.
  pub fn invalid_parameter(message: impl Into<String>) -> Self {
    ActionError::InvalidParameter {
      message: message.into(),
    }
  }
}
