//! Flow executor implementation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use verbena_action::{ActionRegistry, DynAction, RunContext};
use verbena_store::{ActionDescriptor, FlowRecord, FlowState, FlowStore, LockStore};

use crate::error::ExecutorError;

/// Result of a completed flow execution.
#[derive(Debug)]
pub struct ExecutionReport {
  pub flow_id: String,
  /// Output of each action, in execution order.
  pub outputs: Vec<serde_json::Value>,
}

type Step = (Arc<dyn DynAction>, ActionDescriptor);

/// Drives a flow through its ordered actions.
///
/// The executor claims the flow's target resource, moves the record to
/// `Running` by CAS, runs each action through the registry, and lands
/// the record in a terminal state. It never releases locks; reconciling
/// the lock with the flow's outcome belongs to the watcher.
pub struct FlowExecutor<S> {
  store: Arc<S>,
  registry: Arc<ActionRegistry>,
}

impl<S> FlowExecutor<S>
where
  S: FlowStore + LockStore,
{
  pub fn new(store: Arc<S>, registry: Arc<ActionRegistry>) -> Self {
    Self { store, registry }
  }

  /// Execute the flow with the given ID.
  #[instrument(name = "flow_execute", skip(self, cancel), fields(flow_id = %flow_id))]
  pub async fn execute(
    &self,
    flow_id: &str,
    cancel: CancellationToken,
  ) -> Result<ExecutionReport, ExecutorError> {
    let flow = self
      .store
      .get_flow(flow_id)
      .await?
      .ok_or_else(|| ExecutorError::FlowNotFound(flow_id.to_string()))?;

    // Only a pre-execution flow may claim anything; taking the lock
    // for a flow that will never run would leave the resource blocked
    // until a watcher pass cleans it up.
    if !matches!(flow.state, FlowState::Init | FlowState::Pending) {
      return Err(ExecutorError::Conflict {
        flow_id: flow.flow_id.clone(),
        state: flow.state,
      });
    }

    // Resolve every action up front so an unknown name aborts before
    // any state is touched.
    let mut steps: Vec<Step> = Vec::with_capacity(flow.actions.0.len());
    for descriptor in flow.actions.0.iter() {
      let action = self
        .registry
        .get(&descriptor.name)
        .ok_or_else(|| ExecutorError::UnknownAction(descriptor.name.clone()))?;
      steps.push((action, descriptor.clone()));
    }

    self.claim_resource(&flow).await?;
    self.claim_flow(&flow).await?;

    let ctx = RunContext::with_cancel(cancel);
    info!(rid = %ctx.rid(), steps = steps.len(), "flow execution started");
    self.run_actions(&ctx, &flow, steps).await
  }

  /// Take the resource lock for this flow, or confirm it already holds
  /// one (the starting caller may have pre-created it).
  async fn claim_resource(&self, flow: &FlowRecord) -> Result<(), ExecutorError> {
    let held = self
      .store
      .find_locks(&flow.res_id, &flow.res_type, &flow.flow_id)
      .await?;
    if !held.is_empty() {
      return Ok(());
    }

    match self
      .store
      .acquire_lock(&flow.res_id, &flow.res_type, &flow.flow_id)
      .await
    {
      Ok(()) => Ok(()),
      Err(verbena_store::Error::ResourceBusy { res_id, res_type }) => {
        Err(ExecutorError::ResourceBusy { res_id, res_type })
      }
      Err(e) => Err(e.into()),
    }
  }

  /// CAS the flow into `Running` from either pre-execution state.
  ///
  /// A lost CAS is re-evaluated against a fresh read; only a flow that
  /// is neither `Init` nor `Pending` is a real conflict.
  async fn claim_flow(&self, flow: &FlowRecord) -> Result<(), ExecutorError> {
    let mut state = flow.state;
    for _ in 0..3 {
      let source = match state {
        FlowState::Init => FlowState::Init,
        FlowState::Pending => FlowState::Pending,
        other => {
          return Err(ExecutorError::Conflict {
            flow_id: flow.flow_id.clone(),
            state: other,
          });
        }
      };

      let rows = self
        .store
        .update_state_cas(&flow.flow_id, source, FlowState::Running)
        .await?;
      if rows == 1 {
        return Ok(());
      }

      state = self
        .store
        .get_flow(&flow.flow_id)
        .await?
        .ok_or_else(|| ExecutorError::FlowNotFound(flow.flow_id.clone()))?
        .state;
    }

    Err(ExecutorError::Conflict {
      flow_id: flow.flow_id.clone(),
      state,
    })
  }

  async fn run_actions(
    &self,
    ctx: &RunContext,
    flow: &FlowRecord,
    steps: Vec<Step>,
  ) -> Result<ExecutionReport, ExecutorError> {
    let mut outputs = Vec::with_capacity(steps.len());
    let mut completed: Vec<Step> = Vec::new();

    for (action, descriptor) in steps {
      // Cancellation arrives through the state machine; a host shutdown
      // arrives through the token. Check both between steps.
      if ctx.is_cancelled() {
        return self.finish_cancelled(ctx, flow, &completed).await;
      }
      let current = self
        .store
        .get_flow(&flow.flow_id)
        .await?
        .map(|f| f.state);
      if current == Some(FlowState::Cancel) {
        self.rollback_completed(ctx, &completed).await;
        return Err(ExecutorError::Cancelled(flow.flow_id.clone()));
      }

      info!(rid = %ctx.rid(), action = %descriptor.name, "running action");
      match action.run(ctx, &descriptor.params).await {
        Ok(output) => {
          outputs.push(output);
          completed.push((action, descriptor));
        }
        Err(e) => {
          error!(rid = %ctx.rid(), action = %descriptor.name, error = %e, "action failed");
          self.rollback_completed(ctx, &completed).await;
          let rows = self
            .store
            .update_state_cas(&flow.flow_id, FlowState::Running, FlowState::Failed)
            .await?;
          if rows == 0 {
            warn!(rid = %ctx.rid(), "flow state moved concurrently while marking failed");
          }
          return Err(ExecutorError::ActionFailed {
            name: descriptor.name,
            source: e,
          });
        }
      }
    }

    let rows = self
      .store
      .update_state_cas(&flow.flow_id, FlowState::Running, FlowState::Success)
      .await?;
    if rows == 0 {
      // A concurrent writer drove the flow terminal first. The only
      // defined writer here is a cancellation request.
      let state = self
        .store
        .get_flow(&flow.flow_id)
        .await?
        .map(|f| f.state);
      if state == Some(FlowState::Cancel) {
        self.rollback_completed(ctx, &completed).await;
        return Err(ExecutorError::Cancelled(flow.flow_id.clone()));
      }
      return Err(ExecutorError::Conflict {
        flow_id: flow.flow_id.clone(),
        state: state.unwrap_or(FlowState::Running),
      });
    }

    info!(rid = %ctx.rid(), "flow execution succeeded");
    Ok(ExecutionReport {
      flow_id: flow.flow_id.clone(),
      outputs,
    })
  }

  async fn finish_cancelled(
    &self,
    ctx: &RunContext,
    flow: &FlowRecord,
    completed: &[Step],
  ) -> Result<ExecutionReport, ExecutorError> {
    self.rollback_completed(ctx, completed).await;
    let rows = self
      .store
      .update_state_cas(&flow.flow_id, FlowState::Running, FlowState::Cancel)
      .await?;
    if rows == 0 {
      warn!(rid = %ctx.rid(), "flow state moved concurrently while cancelling");
    }
    Err(ExecutorError::Cancelled(flow.flow_id.clone()))
  }

  /// Best-effort compensation, in reverse order. The external system
  /// has no transactions, so a rollback failure is logged and skipped
  /// rather than retried.
  async fn rollback_completed(&self, ctx: &RunContext, completed: &[Step]) {
    for (action, descriptor) in completed.iter().rev() {
      info!(rid = %ctx.rid(), action = %descriptor.name, "rolling back action");
      if let Err(e) = action.rollback(ctx, &descriptor.params).await {
        error!(rid = %ctx.rid(), action = %descriptor.name, error = %e, "rollback failed");
      }
    }
  }
}
