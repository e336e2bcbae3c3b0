use chrono::Utc;
use sqlx::SqlitePool;

use crate::types::{FlowRecord, FlowState, LockRecord, LockStatus};
use crate::{Error, FlowStore, LockStore};

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Prepare the schema.
  ///
  /// The partial unique index on `resource_locks` is what enforces the
  /// one-live-lock-per-resource invariant: a second `locked` row for the
  /// same `(res_id, res_type)` cannot be inserted, while released rows
  /// accumulate freely as history.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS flows (
                flow_id    TEXT PRIMARY KEY,
                task_type  TEXT NOT NULL,
                res_id     TEXT NOT NULL,
                res_type   TEXT NOT NULL,
                state      TEXT NOT NULL,
                actions    TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS resource_locks (
                res_id     TEXT NOT NULL,
                res_type   TEXT NOT NULL,
                owner      TEXT NOT NULL,
                status     TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
    )
    .execute(&self.pool)
    .await?;

    sqlx::query(
      r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_resource_locks_live
            ON resource_locks (res_id, res_type)
            WHERE status = 'locked'
            "#,
    )
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}

#[async_trait::async_trait]
impl FlowStore for SqliteStore {
  async fn create_flow(&self, flow: &FlowRecord) -> Result<(), Error> {
    sqlx::query(
      r#"
            INSERT INTO flows (flow_id, task_type, res_id, res_type, state, actions, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
    )
    .bind(&flow.flow_id)
    .bind(&flow.task_type)
    .bind(&flow.res_id)
    .bind(&flow.res_type)
    .bind(flow.state)
    .bind(&flow.actions)
    .bind(flow.created_at)
    .bind(flow.updated_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_flow(&self, flow_id: &str) -> Result<Option<FlowRecord>, Error> {
    let flow = sqlx::query_as(
      r#"
            SELECT flow_id, task_type, res_id, res_type, state, actions, created_at, updated_at
            FROM flows
            WHERE flow_id = ?
            "#,
    )
    .bind(flow_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(flow)
  }

  async fn update_state_cas(
    &self,
    flow_id: &str,
    expected: FlowState,
    target: FlowState,
  ) -> Result<u64, Error> {
    let result = sqlx::query(
      r#"
            UPDATE flows
            SET state = ?, updated_at = ?
            WHERE flow_id = ? AND state = ?
            "#,
    )
    .bind(target)
    .bind(Utc::now())
    .bind(flow_id)
    .bind(expected)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }
}

#[async_trait::async_trait]
impl LockStore for SqliteStore {
  async fn acquire_lock(&self, res_id: &str, res_type: &str, owner: &str) -> Result<(), Error> {
    let result = sqlx::query(
      r#"
            INSERT INTO resource_locks (res_id, res_type, owner, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
    )
    .bind(res_id)
    .bind(res_type)
    .bind(owner)
    .bind(LockStatus::Locked)
    .bind(Utc::now())
    .execute(&self.pool)
    .await;

    match result {
      Ok(_) => Ok(()),
      Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::ResourceBusy {
        res_id: res_id.to_string(),
        res_type: res_type.to_string(),
      }),
      Err(e) => Err(e.into()),
    }
  }

  async fn find_locks(
    &self,
    res_id: &str,
    res_type: &str,
    owner: &str,
  ) -> Result<Vec<LockRecord>, Error> {
    let locks = sqlx::query_as(
      r#"
            SELECT res_id, res_type, owner, status, created_at
            FROM resource_locks
            WHERE res_id = ? AND res_type = ? AND owner = ? AND status = ?
            "#,
    )
    .bind(res_id)
    .bind(res_type)
    .bind(owner)
    .bind(LockStatus::Locked)
    .fetch_all(&self.pool)
    .await?;

    Ok(locks)
  }

  async fn release_lock(
    &self,
    res_id: &str,
    res_type: &str,
    owner: &str,
    status: LockStatus,
  ) -> Result<(), Error> {
    sqlx::query(
      r#"
            UPDATE resource_locks
            SET status = ?
            WHERE res_id = ? AND res_type = ? AND owner = ? AND status = ?
            "#,
    )
    .bind(status)
    .bind(res_id)
    .bind(res_type)
    .bind(owner)
    .bind(LockStatus::Locked)
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
