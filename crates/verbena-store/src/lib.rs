//! Verbena Store
//!
//! This crate provides the storage traits and SQLite implementation for
//! flow records and resource locks. All cross-process coordination goes
//! through two single-row primitives:
//!
//! - conditional ("CAS") state updates on flow records, and
//! - unique-key insertion of lock rows.
//!
//! There is no in-memory locking; independent worker processes share
//! nothing but the database.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::{ActionDescriptor, FlowRecord, FlowState, LockRecord, LockStatus};

use async_trait::async_trait;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The resource already has a live lock held by another flow.
  #[error("resource {res_id} ({res_type}) is busy")]
  ResourceBusy { res_id: String, res_type: String },

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// Storage trait for flow records.
#[async_trait]
pub trait FlowStore: Send + Sync {
  /// Create a new flow record.
  async fn create_flow(&self, flow: &FlowRecord) -> Result<(), Error>;

  /// Get a flow record by ID. Absence is not an error.
  async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowRecord>, Error>;

  /// Conditionally move a flow from `expected` to `target`.
  ///
  /// Returns the number of rows affected. Zero means the persisted state
  /// no longer matched `expected` (a concurrent writer won the race);
  /// callers must re-read and re-evaluate rather than treat it as a
  /// failure.
  async fn update_state_cas(
    &self,
    flow_id: &str,
    expected: FlowState,
    target: FlowState,
  ) -> Result<u64, Error>;
}

/// Storage trait for resource locks.
///
/// At most one `Locked` row may exist per `(res_id, res_type)` at any
/// instant; implementations enforce this with a unique constraint, not
/// with application logic.
#[async_trait]
pub trait LockStore: Send + Sync {
  /// Claim a resource for the given flow.
  ///
  /// Returns [`Error::ResourceBusy`] when another live lock already
  /// covers the key.
  async fn acquire_lock(&self, res_id: &str, res_type: &str, owner: &str) -> Result<(), Error>;

  /// List lock rows still held for the resource by the given owner.
  async fn find_locks(
    &self,
    res_id: &str,
    res_type: &str,
    owner: &str,
  ) -> Result<Vec<LockRecord>, Error>;

  /// Release the lock held on the resource by `owner`, recording why.
  ///
  /// Only a row matching all three of `(res_id, res_type, owner)` and
  /// still in `Locked` status is touched; a lock can never be released
  /// on behalf of a different flow. Releasing an already-released lock
  /// is a no-op.
  async fn release_lock(
    &self,
    res_id: &str,
    res_type: &str,
    owner: &str,
    status: LockStatus,
  ) -> Result<(), Error>;
}
