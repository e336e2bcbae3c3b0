//! Execution context handed to actions.

use tokio_util::sync::CancellationToken;

/// Context for a single action invocation.
///
/// Carries the request ID used for log correlation across the store,
/// executor and watcher, plus the host's cancellation token.
#[derive(Debug, Clone)]
pub struct RunContext {
  rid: String,
  cancel: CancellationToken,
}

impl RunContext {
  /// Create a context with a fresh request ID and its own token.
  pub fn new() -> Self {
    Self::with_cancel(CancellationToken::new())
  }

  /// Create a context with a fresh request ID under the given token.
  pub fn with_cancel(cancel: CancellationToken) -> Self {
    Self {
      rid: uuid::Uuid::new_v4().to_string(),
      cancel,
    }
  }

  /// Request ID for this invocation.
  pub fn rid(&self) -> &str {
    &self.rid
  }

  /// The host's cancellation token.
  pub fn cancel(&self) -> &CancellationToken {
    &self.cancel
  }

  /// Whether the host asked this invocation to stop.
  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}

impl Default for RunContext {
  fn default() -> Self {
    Self::new()
  }
}
