use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

/// Lifecycle state of a flow.
///
/// `Success`, `Failed` and `Cancel` are terminal; no transition is ever
/// issued out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FlowState {
  Init,
  Pending,
  Running,
  Success,
  Failed,
  Cancel,
}

impl FlowState {
  /// Whether no further transition is defined out of this state.
  pub fn is_terminal(&self) -> bool {
    matches!(self, FlowState::Success | FlowState::Failed | FlowState::Cancel)
  }
}

/// Status of a resource lock row.
///
/// Release is a status change, never a delete or a reassignment; the
/// three unlocked statuses record why ownership ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LockStatus {
  Locked,
  UnlockedSuccess,
  UnlockedCancelled,
  UnlockedTimeout,
}

/// One opaque action invocation inside a flow: a registry name plus its
/// JSON parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
  pub name: String,
  pub params: serde_json::Value,
}

/// A flow as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FlowRecord {
  pub flow_id: String,
  /// Kind of operation this flow performs (e.g. "create_listener").
  pub task_type: String,
  /// The one external resource this flow mutates.
  pub res_id: String,
  pub res_type: String,
  pub state: FlowState,
  pub actions: Json<Vec<ActionDescriptor>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl FlowRecord {
  /// Build a fresh record in `Init` with timestamps set to now.
  pub fn new(
    flow_id: impl Into<String>,
    task_type: impl Into<String>,
    res_id: impl Into<String>,
    res_type: impl Into<String>,
    actions: Vec<ActionDescriptor>,
  ) -> Self {
    let now = Utc::now();
    Self {
      flow_id: flow_id.into(),
      task_type: task_type.into(),
      res_id: res_id.into(),
      res_type: res_type.into(),
      state: FlowState::Init,
      actions: Json(actions),
      created_at: now,
      updated_at: now,
    }
  }
}

/// A resource lock row as stored in the database.
///
/// The owner is immutable for the life of the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LockRecord {
  pub res_id: String,
  pub res_type: String,
  /// Flow ID that claimed the resource.
  pub owner: String,
  pub status: LockStatus,
  pub created_at: DateTime<Utc>,
}
