//! The typed action trait and its type-erased form.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::context::RunContext;
use crate::error::ActionError;

/// One unit of work inside a flow.
///
/// Implementations declare a stable name (used for registry dispatch),
/// a typed parameter struct, and run/rollback behavior. Rollback is
/// best-effort compensation: the external system being mutated has no
/// transactions, so it may not fully undo `run`'s effects.
#[async_trait]
pub trait Action: Send + Sync + 'static {
  /// Typed parameter payload; a fresh value is deserialized from the
  /// caller's JSON for every invocation.
  type Params: DeserializeOwned + Send + Sync;

  /// Stable name used for dispatch and audit.
  fn name(&self) -> &'static str;

  /// Reject malformed parameters before execution.
  fn validate(&self, _params: &Self::Params) -> Result<(), ActionError> {
    Ok(())
  }

  /// Perform the operation.
  async fn run(
    &self,
    ctx: &RunContext,
    params: Self::Params,
  ) -> Result<serde_json::Value, ActionError>;

  /// Compensate a completed `run` because a later action in the same
  /// flow failed. Defaults to a no-op.
  async fn rollback(&self, _ctx: &RunContext, _params: Self::Params) -> Result<(), ActionError> {
    Ok(())
  }
}

/// Object-safe form of [`Action`] taking raw JSON parameters.
///
/// The blanket impl deserializes and validates the payload before
/// dispatching, so hosts only ever deal in `serde_json::Value`.
#[async_trait]
pub trait DynAction: Send + Sync {
  /// Stable name used for dispatch and audit.
  fn name(&self) -> &'static str;

  /// Deserialize and validate the payload without running anything.
  fn validate(&self, params: &serde_json::Value) -> Result<(), ActionError>;

  /// Validate and run with a raw JSON payload.
  async fn run(
    &self,
    ctx: &RunContext,
    params: &serde_json::Value,
  ) -> Result<serde_json::Value, ActionError>;

  /// Validate and roll back with a raw JSON payload.
  async fn rollback(
    &self,
    ctx: &RunContext,
    params: &serde_json::Value,
  ) -> Result<(), ActionError>;
}

fn decode<P: DeserializeOwned>(params: &serde_json::Value) -> Result<P, ActionError> {
  serde_json::from_value(params.clone()).map_err(|e| ActionError::InvalidParameter {
    message: e.to_string(),
  })
}

#[async_trait]
impl<A: Action> DynAction for A {
  fn name(&self) -> &'static str {
    Action::name(self)
  }

  fn validate(&self, params: &serde_json::Value) -> Result<(), ActionError> {
    let typed: A::Params = decode(params)?;
    Action::validate(self, &typed)
  }

  async fn run(
    &self,
    ctx: &RunContext,
    params: &serde_json::Value,
  ) -> Result<serde_json::Value, ActionError> {
    let typed: A::Params = decode(params)?;
    Action::validate(self, &typed)?;
    Action::run(self, ctx, typed).await
  }

  async fn rollback(
    &self,
    ctx: &RunContext,
    params: &serde_json::Value,
  ) -> Result<(), ActionError> {
    let typed: A::Params = decode(params)?;
    Action::rollback(self, ctx, typed).await
  }
}
