//! Verbena Watcher
//!
//! A flow that mutates an external resource holds a lock on it, and
//! nothing about a crashed worker or a stuck flow releases that lock on
//! its own. The watcher is the reconciliation loop that does: it polls
//! the flow record until a decision can be made, then brings the lock
//! row into agreement with the flow's true outcome.
//!
//! The watcher is packaged as an [`Action`] so the same host framework
//! that runs flow actions can schedule, retry and roll back watcher
//! invocations.

mod reconcile;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use verbena_action::{Action, ActionError, RunContext};
use verbena_store::{FlowState, FlowStore, LockStore};

use crate::reconcile::{Step, decide};

/// Cadence and limits for the watcher loop.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
  /// Sleep between polls of the flow record.
  pub poll_interval: Duration,
  /// Wall-clock limit for one watcher invocation. This bounds worker
  /// occupancy; the lock/CAS invariants hold whether or not the loop
  /// ever completes.
  pub wait_deadline: Duration,
  /// How long a lock owned by a `Failed` flow may be held before the
  /// watcher reclaims it.
  pub lock_expiry: chrono::Duration,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      poll_interval: Duration::from_millis(500),
      wait_deadline: Duration::from_secs(5 * 60),
      lock_expiry: chrono::Duration::days(3),
    }
  }
}

/// Parameters for one watcher invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowWatchParams {
  pub flow_id: String,
  pub res_id: String,
  pub res_type: String,
  pub task_type: String,
}

/// The watcher action. Generic over the shared store so tests can run
/// it against an in-memory database.
pub struct FlowWatchAction<S> {
  store: Arc<S>,
  config: WatcherConfig,
}

impl<S> FlowWatchAction<S> {
  pub fn new(store: Arc<S>, config: WatcherConfig) -> Self {
    Self { store, config }
  }
}

#[async_trait]
impl<S> Action for FlowWatchAction<S>
where
  S: FlowStore + LockStore + 'static,
{
  type Params = FlowWatchParams;

  fn name(&self) -> &'static str {
    "flow_watch"
  }

  fn validate(&self, params: &FlowWatchParams) -> Result<(), ActionError> {
    for (field, value) in [
      ("flow_id", &params.flow_id),
      ("res_id", &params.res_id),
      ("res_type", &params.res_type),
      ("task_type", &params.task_type),
    ] {
      if value.is_empty() {
        return Err(ActionError::invalid_parameter(format!("{field} is required")));
      }
    }
    Ok(())
  }

  async fn run(
    &self,
    ctx: &RunContext,
    params: FlowWatchParams,
  ) -> Result<serde_json::Value, ActionError> {
    let deadline = tokio::time::Instant::now() + self.config.wait_deadline;

    loop {
      if tokio::time::Instant::now() >= deadline {
        return Err(ActionError::WaitTimeout {
          flow_id: params.flow_id.clone(),
        });
      }

      let flow = self
        .store
        .get_flow(&params.flow_id)
        .await
        .map_err(ActionError::failed)?;

      let Some(flow) = flow else {
        info!(flow_id = %params.flow_id, rid = %ctx.rid(), "flow not found, nothing to reconcile");
        return Ok(serde_json::Value::Null);
      };

      if self.process_flow(ctx, &params, flow.state).await? {
        info!(flow_id = %params.flow_id, state = ?flow.state, rid = %ctx.rid(), "flow reconciled");
        return Ok(serde_json::Value::Null);
      }

      tokio::select! {
        _ = ctx.cancel().cancelled() => return Err(ActionError::Cancelled),
        _ = tokio::time::sleep(self.config.poll_interval) => {}
      }
    }
  }

  /// Reconciliation has no partial side effects to undo: either a
  /// release happened (idempotent to repeat) or nothing happened.
  async fn rollback(&self, ctx: &RunContext, params: FlowWatchParams) -> Result<(), ActionError> {
    info!(flow_id = %params.flow_id, rid = %ctx.rid(), "flow watch rollback is a no-op");
    Ok(())
  }
}

impl<S> FlowWatchAction<S>
where
  S: FlowStore + LockStore + 'static,
{
  /// Run one reconciliation pass. Returns `true` when the loop is done.
  async fn process_flow(
    &self,
    ctx: &RunContext,
    params: &FlowWatchParams,
    state: FlowState,
  ) -> Result<bool, ActionError> {
    let locks = match state {
      // Only these states need the lock rows to decide.
      FlowState::Failed | FlowState::Init => self
        .store
        .find_locks(&params.res_id, &params.res_type, &params.flow_id)
        .await
        .map_err(ActionError::failed)?,
      _ => Vec::new(),
    };

    match decide(state, &locks, chrono::Utc::now(), self.config.lock_expiry) {
      Step::Terminate => Ok(true),
      Step::Release(status) => {
        self
          .store
          .release_lock(&params.res_id, &params.res_type, &params.flow_id, status)
          .await
          .map_err(|e| {
            error!(
              flow_id = %params.flow_id,
              res_id = %params.res_id,
              rid = %ctx.rid(),
              error = %e,
              "failed to release resource lock"
            );
            ActionError::failed(e)
          })?;
        info!(
          flow_id = %params.flow_id,
          res_id = %params.res_id,
          status = ?status,
          rid = %ctx.rid(),
          "released resource lock"
        );
        Ok(true)
      }
      Step::MarkPending => {
        let rows = self
          .store
          .update_state_cas(&params.flow_id, FlowState::Init, FlowState::Pending)
          .await
          .map_err(ActionError::failed)?;
        if rows == 0 {
          // Another actor advanced the flow first; the next poll will
          // see the new state.
          warn!(flow_id = %params.flow_id, rid = %ctx.rid(), "lost init->pending race");
        }
        Ok(false)
      }
      Step::Poll => Ok(false),
    }
  }
}
