//! The reconciliation decision, kept pure for testability.

use chrono::{DateTime, Duration, Utc};
use verbena_store::{FlowState, LockRecord, LockStatus};

/// What one watcher iteration should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
  /// Nothing left to reconcile; the loop ends cleanly.
  Terminate,
  /// Release the lock with the given status, then end the loop.
  Release(LockStatus),
  /// Move the flow from `Init` to `Pending`, then keep polling.
  MarkPending,
  /// No decision possible yet; sleep and poll again.
  Poll,
}

/// Decide the next step from the observed flow state and the lock rows
/// this flow still holds on its resource.
///
/// A `Failed` flow may be transient (about to be retried externally),
/// so its lock is only reclaimed once it has been held longer than
/// `lock_expiry`; a younger lock is left in place and the pass ends so
/// a later watcher invocation can look again.
pub(crate) fn decide(
  state: FlowState,
  locks: &[LockRecord],
  now: DateTime<Utc>,
  lock_expiry: Duration,
) -> Step {
  match state {
    FlowState::Success => Step::Release(LockStatus::UnlockedSuccess),
    FlowState::Cancel => Step::Release(LockStatus::UnlockedCancelled),
    FlowState::Failed => match locks.first() {
      None => Step::Terminate,
      Some(lock) if now - lock.created_at > lock_expiry => {
        Step::Release(LockStatus::UnlockedTimeout)
      }
      Some(_) => Step::Terminate,
    },
    FlowState::Init => {
      if locks.is_empty() {
        // No lock was ever taken; the flow is free to proceed.
        Step::Terminate
      } else {
        Step::MarkPending
      }
    }
    FlowState::Pending | FlowState::Running => Step::Poll,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn lock_created(at: DateTime<Utc>) -> LockRecord {
    LockRecord {
      res_id: "lb-001".to_string(),
      res_type: "load_balancer".to_string(),
      owner: "f-1".to_string(),
      status: LockStatus::Locked,
      created_at: at,
    }
  }

  #[test]
  fn terminal_states_release_with_matching_status() {
    let now = Utc::now();
    let expiry = Duration::days(3);

    assert_eq!(
      decide(FlowState::Success, &[], now, expiry),
      Step::Release(LockStatus::UnlockedSuccess)
    );
    assert_eq!(
      decide(FlowState::Cancel, &[], now, expiry),
      Step::Release(LockStatus::UnlockedCancelled)
    );
  }

  #[test]
  fn failed_without_lock_terminates() {
    assert_eq!(
      decide(FlowState::Failed, &[], Utc::now(), Duration::days(3)),
      Step::Terminate
    );
  }

  #[test]
  fn failed_with_young_lock_leaves_it_alone() {
    let now = Utc::now();
    let locks = [lock_created(now - Duration::hours(1))];
    assert_eq!(
      decide(FlowState::Failed, &locks, now, Duration::days(3)),
      Step::Terminate
    );
  }

  #[test]
  fn failed_with_expired_lock_reclaims_it() {
    let now = Utc::now();
    let locks = [lock_created(now - Duration::days(4))];
    assert_eq!(
      decide(FlowState::Failed, &locks, now, Duration::days(3)),
      Step::Release(LockStatus::UnlockedTimeout)
    );
  }

  #[test]
  fn init_without_lock_terminates() {
    assert_eq!(
      decide(FlowState::Init, &[], Utc::now(), Duration::days(3)),
      Step::Terminate
    );
  }

  #[test]
  fn init_with_lock_marks_pending() {
    let now = Utc::now();
    let locks = [lock_created(now)];
    assert_eq!(decide(FlowState::Init, &locks, now, Duration::days(3)), Step::MarkPending);
  }

  #[test]
  fn in_flight_states_keep_polling() {
    let now = Utc::now();
    assert_eq!(decide(FlowState::Pending, &[], now, Duration::days(3)), Step::Poll);
    assert_eq!(decide(FlowState::Running, &[], now, Duration::days(3)), Step::Poll);
  }
}
