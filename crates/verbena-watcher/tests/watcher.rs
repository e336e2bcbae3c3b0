//! Watcher loop tests against an in-memory SQLite store.

use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;
use tokio_util::sync::CancellationToken;

use verbena_action::{Action, ActionError, RunContext};
use verbena_store::{FlowRecord, FlowState, FlowStore, LockStatus, LockStore, SqliteStore};
use verbena_watcher::{FlowWatchAction, FlowWatchParams, WatcherConfig};

async fn test_store() -> Arc<SqliteStore> {
  let pool = SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("failed to open in-memory sqlite");
  let store = SqliteStore::new(pool);
  store.migrate().await.expect("migrate failed");
  Arc::new(store)
}

fn fast_config() -> WatcherConfig {
  WatcherConfig {
    poll_interval: Duration::from_millis(10),
    wait_deadline: Duration::from_secs(2),
    lock_expiry: chrono::Duration::days(3),
  }
}

fn watch_params(flow_id: &str) -> FlowWatchParams {
  FlowWatchParams {
    flow_id: flow_id.to_string(),
    res_id: "disk-001".to_string(),
    res_type: "disk".to_string(),
    task_type: "attach_disk".to_string(),
  }
}

async fn create_flow(store: &SqliteStore, flow_id: &str, state: FlowState) {
  let flow = FlowRecord::new(flow_id, "attach_disk", "disk-001", "disk", vec![]);
  store.create_flow(&flow).await.unwrap();
  if state != FlowState::Init {
    let rows = store.update_state_cas(flow_id, FlowState::Init, state).await.unwrap();
    assert_eq!(rows, 1);
  }
}

#[tokio::test]
async fn missing_flow_terminates_without_error() {
  let store = test_store().await;
  let watcher = FlowWatchAction::new(store, fast_config());

  watcher.run(&RunContext::new(), watch_params("no-such-flow")).await.unwrap();
}

#[tokio::test]
async fn success_releases_lock_in_a_single_pass() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Success).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let watcher = FlowWatchAction::new(store.clone(), fast_config());
  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();

  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert!(live.is_empty(), "lock should be released");

  // Another flow can take the resource afterwards.
  store.acquire_lock("disk-001", "disk", "f-2").await.unwrap();
}

#[tokio::test]
async fn cancelled_flow_releases_lock() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Cancel).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let watcher = FlowWatchAction::new(store.clone(), fast_config());
  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();

  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert!(live.is_empty());
}

#[tokio::test]
async fn failed_flow_with_young_lock_is_left_alone() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Failed).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let watcher = FlowWatchAction::new(store.clone(), fast_config());
  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();

  // The pass ends cleanly but the lock stays for a later attempt.
  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert_eq!(live.len(), 1);
  assert_eq!(live[0].status, LockStatus::Locked);
}

#[tokio::test]
async fn failed_flow_with_expired_lock_is_reclaimed() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Failed).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let config = WatcherConfig {
    lock_expiry: chrono::Duration::milliseconds(20),
    ..fast_config()
  };
  tokio::time::sleep(Duration::from_millis(50)).await;

  let watcher = FlowWatchAction::new(store.clone(), config);
  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();

  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert!(live.is_empty(), "expired lock should be reclaimed");

  // The resource is usable again even though f-1 never finished cleanly.
  store.acquire_lock("disk-001", "disk", "f-2").await.unwrap();
}

#[tokio::test]
async fn stuck_init_without_lock_terminates_early() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Init).await;

  let watcher = FlowWatchAction::new(store, fast_config());
  let started = std::time::Instant::now();
  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();

  assert!(
    started.elapsed() < Duration::from_millis(500),
    "no lock was ever taken, the watcher must not wait out the deadline"
  );
}

#[tokio::test]
async fn init_with_lock_is_marked_pending_and_followed_to_success() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Init).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let watcher = FlowWatchAction::new(store.clone(), fast_config());
  let handle = {
    let watcher_store = store.clone();
    tokio::spawn(async move {
      // Play the executor: wait for the watcher's init->pending CAS,
      // then drive the flow to its terminal state.
      loop {
        let flow = watcher_store.get_flow("f-1").await.unwrap().unwrap();
        if flow.state == FlowState::Pending {
          break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
      }
      let rows = watcher_store
        .update_state_cas("f-1", FlowState::Pending, FlowState::Running)
        .await
        .unwrap();
      assert_eq!(rows, 1);
      tokio::time::sleep(Duration::from_millis(30)).await;
      let rows = watcher_store
        .update_state_cas("f-1", FlowState::Running, FlowState::Success)
        .await
        .unwrap();
      assert_eq!(rows, 1);
    })
  };

  watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap();
  handle.await.unwrap();

  let flow = store.get_flow("f-1").await.unwrap().unwrap();
  assert_eq!(flow.state, FlowState::Success);
  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert!(live.is_empty(), "lock should end as unlocked_success");
}

#[tokio::test]
async fn non_terminating_flow_hits_the_wait_deadline() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Running).await;
  store.acquire_lock("disk-001", "disk", "f-1").await.unwrap();

  let config = WatcherConfig {
    wait_deadline: Duration::from_millis(100),
    ..fast_config()
  };
  let watcher = FlowWatchAction::new(store.clone(), config);
  let err = watcher.run(&RunContext::new(), watch_params("f-1")).await.unwrap_err();
  assert!(matches!(err, ActionError::WaitTimeout { flow_id } if flow_id == "f-1"));

  // A deadline is a liveness valve, not a correctness mechanism: the
  // lock is untouched.
  let live = store.find_locks("disk-001", "disk", "f-1").await.unwrap();
  assert_eq!(live.len(), 1);
}

#[tokio::test]
async fn host_cancellation_stops_the_loop() {
  let store = test_store().await;
  create_flow(&store, "f-1", FlowState::Running).await;

  let cancel = CancellationToken::new();
  let ctx = RunContext::with_cancel(cancel.clone());
  let watcher = FlowWatchAction::new(store, fast_config());

  let handle = tokio::spawn(async move { watcher.run(&ctx, watch_params("f-1")).await });
  tokio::time::sleep(Duration::from_millis(30)).await;
  cancel.cancel();

  let err = handle.await.unwrap().unwrap_err();
  assert!(matches!(err, ActionError::Cancelled));
}

#[tokio::test]
async fn blank_params_are_rejected() {
  let store = test_store().await;
  let watcher = FlowWatchAction::new(store, fast_config());

  let mut params = watch_params("f-1");
  params.res_id = String::new();
  let err = watcher.validate(&params).unwrap_err();
  assert!(matches!(err, ActionError::InvalidParameter { .. }));
}
