//! Per-entity refresh leases.
//!
//! The table is the only shared mutable state in the engine. Every
//! transition is a check-and-set under one mutex that is never held across
//! an await, so two cycles for the same key cannot both start. Distinct keys
//! only contend for the brief map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use dcp_common::{EntityKey, ProfileRecord, RefreshConfig, RefreshState, RefreshStatus};

use super::NotReadyReason;

/// How a refresh cycle ended, as seen by callers waiting on it.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Refreshed(ProfileRecord),
    Failed(NotReadyReason),
    PersistenceFailed(String),
}

type OutcomeTx = watch::Sender<Option<CycleOutcome>>;
pub type OutcomeRx = watch::Receiver<Option<CycleOutcome>>;

struct Entry {
    state: RefreshState,
    /// Present only while a cycle holds the lease.
    outcome: Option<OutcomeTx>,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: RefreshState::idle(),
            outcome: None,
        }
    }

    /// Backing off, unowned, and past its retry time by at least `retention`.
    fn expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.outcome.is_none()
            && self.state.status == RefreshStatus::FailedBackoff
            && self
                .state
                .next_attempt_at
                .and_then(|next| next.checked_add_signed(retention))
                .is_some_and(|expiry| expiry <= now)
    }
}

pub enum Acquire {
    Acquired(LeaseGuard),
    /// Another cycle holds the lease; the receiver yields its outcome.
    InFlight(OutcomeRx),
    BackingOff { next_attempt_at: DateTime<Utc> },
}

#[derive(Clone)]
pub struct LeaseTable {
    entries: Arc<Mutex<HashMap<EntityKey, Entry>>>,
    /// How long a lapsed backoff entry is kept before it is forgotten.
    retention: chrono::Duration,
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self::with_retention(Duration::from_secs(3_600))
    }
}

impl LeaseTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            entries: Arc::default(),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EntityKey, Entry>> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Try to move `key` into `Refreshing`. Backoff is ignored when `force`
    /// is set; an in-flight cycle never is.
    pub fn try_acquire(&self, key: &EntityKey, now: DateTime<Utc>, force: bool) -> Acquire {
        let mut entries = self.lock();
        self.sweep_locked(&mut entries, now);
        let entry = entries.entry(key.clone()).or_insert_with(Entry::new);

        match entry.state.status {
            RefreshStatus::Refreshing => {
                if let Some(tx) = &entry.outcome {
                    return Acquire::InFlight(tx.subscribe());
                }
                // Refreshing without a sender cannot be observed through the
                // public API; repair rather than wedge the key.
                warn!(entity = %key, "Lease entry refreshing without owner, resetting");
            }
            RefreshStatus::FailedBackoff if !force => {
                if let Some(next) = entry.state.next_attempt_at.filter(|next| *next > now) {
                    return Acquire::BackingOff {
                        next_attempt_at: next,
                    };
                }
            }
            _ => {}
        }

        let token = Uuid::new_v4();
        let (tx, _) = watch::channel(None);
        entry.state.status = RefreshStatus::Refreshing;
        entry.state.lease_token = Some(token);
        entry.state.started_at = Some(now);
        entry.outcome = Some(tx);
        debug!(entity = %key, %token, "Lease acquired");

        Acquire::Acquired(LeaseGuard {
            table: self.clone(),
            key: key.clone(),
            token,
            released: false,
        })
    }

    /// Forget backoff entries whose retry time lapsed more than the
    /// retention ago. Their keys start over from idle.
    pub fn sweep(&self, now: DateTime<Utc>) {
        let mut entries = self.lock();
        self.sweep_locked(&mut entries, now);
    }

    fn sweep_locked(&self, entries: &mut HashMap<EntityKey, Entry>, now: DateTime<Utc>) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.expired(now, self.retention));
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "Lapsed backoff entries dropped");
        }
    }

    pub fn snapshot(&self, key: &EntityKey) -> Option<RefreshState> {
        self.lock().get(key).map(|e| e.state.clone())
    }

    /// Number of keys with live bookkeeping (refreshing or backing off).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to the entry owned by `token` and publish `outcome`.
    /// Entries left idle are dropped.
    fn finish<F>(&self, key: &EntityKey, token: Uuid, outcome: CycleOutcome, f: F)
    where
        F: FnOnce(&mut RefreshState),
    {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if entry.state.lease_token != Some(token) {
            warn!(entity = %key, %token, "Stale lease token ignored");
            return;
        }

        f(&mut entry.state);
        entry.state.lease_token = None;
        entry.state.started_at = None;
        if let Some(tx) = entry.outcome.take() {
            tx.send_replace(Some(outcome));
        }
        if entry.state.status == RefreshStatus::Idle {
            entries.remove(key);
        }
    }
}

/// Exclusive right to refresh one entity. Dropping the guard without
/// completing it releases the lease as a cancellation.
pub struct LeaseGuard {
    table: LeaseTable,
    key: EntityKey,
    token: Uuid,
    released: bool,
}

impl LeaseGuard {
    pub fn key(&self) -> &EntityKey {
        &self.key
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn succeed(mut self, now: DateTime<Utc>, record: ProfileRecord) {
        self.released = true;
        self.table.finish(
            &self.key,
            self.token,
            CycleOutcome::Refreshed(record),
            |state| {
                state.status = RefreshStatus::Idle;
                state.last_success_at = state.last_success_at.max(Some(now));
                state.consecutive_failures = 0;
                state.next_attempt_at = None;
            },
        );
    }

    /// Record a failed cycle and schedule the next automatic attempt.
    pub fn fail(mut self, now: DateTime<Utc>, config: &RefreshConfig, outcome: CycleOutcome) {
        self.released = true;
        self.table.finish(&self.key, self.token, outcome, |state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let backoff = config.backoff_for(state.consecutive_failures);
            state.status = RefreshStatus::FailedBackoff;
            state.last_failure_at = Some(now);
            state.next_attempt_at = Some(
                chrono::Duration::from_std(backoff)
                    .ok()
                    .and_then(|delay| now.checked_add_signed(delay))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
        });
    }

    /// Release without recording success or failure.
    pub fn cancel(mut self) {
        self.release_cancelled();
    }

    fn release_cancelled(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.table.finish(
            &self.key,
            self.token,
            CycleOutcome::Failed(NotReadyReason::Cancelled),
            |state| {
                state.status = if state.consecutive_failures > 0 {
                    RefreshStatus::FailedBackoff
                } else {
                    RefreshStatus::Idle
                };
            },
        );
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.release_cancelled();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record_for, reference_time};

    fn acme() -> EntityKey {
        EntityKey::company("Acme Inc")
    }

    fn acquired(acquire: Acquire) -> LeaseGuard {
        match acquire {
            Acquire::Acquired(guard) => guard,
            _ => panic!("expected the lease"),
        }
    }

    #[test]
    fn second_acquire_sees_in_flight() {
        let table = LeaseTable::new();
        let now = reference_time();
        let _guard = acquired(table.try_acquire(&acme(), now, false));

        assert!(matches!(table.try_acquire(&acme(), now, false), Acquire::InFlight(_)));
        assert!(matches!(table.try_acquire(&acme(), now, true), Acquire::InFlight(_)));
        assert!(matches!(
            table.try_acquire(&EntityKey::company("Globex"), now, false),
            Acquire::Acquired(_)
        ));
    }

    #[test]
    fn success_wakes_waiters_and_clears_entry() {
        let table = LeaseTable::new();
        let now = reference_time();
        let guard = acquired(table.try_acquire(&acme(), now, false));
        let Acquire::InFlight(rx) = table.try_acquire(&acme(), now, false) else {
            panic!("expected in-flight");
        };

        let record = record_for(&acme(), chrono::Duration::zero());
        guard.succeed(now, record.clone());

        assert_eq!(*rx.borrow(), Some(CycleOutcome::Refreshed(record)));
        assert!(table.snapshot(&acme()).is_none());
    }

    #[test]
    fn failures_back_off_exponentially() {
        let table = LeaseTable::new();
        let config = RefreshConfig::default();
        let now = reference_time();

        let guard = acquired(table.try_acquire(&acme(), now, false));
        guard.fail(now, &config, CycleOutcome::Failed(NotReadyReason::AllSourcesFailed));

        let state = table.snapshot(&acme()).unwrap();
        assert_eq!(state.status, RefreshStatus::FailedBackoff);
        assert_eq!(state.consecutive_failures, 1);
        assert_eq!(state.next_attempt_at, Some(now + chrono::Duration::minutes(1)));

        let early = now + chrono::Duration::seconds(30);
        assert!(matches!(
            table.try_acquire(&acme(), early, false),
            Acquire::BackingOff { .. }
        ));

        let later = now + chrono::Duration::seconds(61);
        let guard = acquired(table.try_acquire(&acme(), later, false));
        guard.fail(later, &config, CycleOutcome::Failed(NotReadyReason::AllSourcesFailed));
        let state = table.snapshot(&acme()).unwrap();
        assert_eq!(state.consecutive_failures, 2);
        assert_eq!(
            state.next_attempt_at,
            Some(later + chrono::Duration::from_std(Duration::from_secs(120)).unwrap())
        );
    }

    #[test]
    fn force_ignores_backoff() {
        let table = LeaseTable::new();
        let now = reference_time();
        let guard = acquired(table.try_acquire(&acme(), now, false));
        guard.fail(
            now,
            &RefreshConfig::default(),
            CycleOutcome::Failed(NotReadyReason::AllSourcesFailed),
        );
        assert!(matches!(table.try_acquire(&acme(), now, true), Acquire::Acquired(_)));
    }

    #[test]
    fn dropped_guard_releases_as_cancelled() {
        let table = LeaseTable::new();
        let now = reference_time();
        let guard = acquired(table.try_acquire(&acme(), now, false));
        let Acquire::InFlight(rx) = table.try_acquire(&acme(), now, false) else {
            panic!("expected in-flight");
        };
        drop(guard);

        assert_eq!(
            *rx.borrow(),
            Some(CycleOutcome::Failed(NotReadyReason::Cancelled))
        );
        assert!(table.is_empty());
        assert!(matches!(table.try_acquire(&acme(), now, false), Acquire::Acquired(_)));
    }

    #[test]
    fn lapsed_backoff_entries_are_swept() {
        let table = LeaseTable::with_retention(Duration::from_secs(600));
        let config = RefreshConfig::default();
        let now = reference_time();
        let guard = acquired(table.try_acquire(&acme(), now, false));
        guard.fail(now, &config, CycleOutcome::Failed(NotReadyReason::AllSourcesFailed));

        // Retry due at +1m; kept until +11m.
        table.sweep(now + chrono::Duration::minutes(10));
        assert_eq!(table.len(), 1);

        let globex = EntityKey::company("Globex");
        let later = now + chrono::Duration::minutes(11);
        let _other = acquired(table.try_acquire(&globex, later, false));
        assert!(table.snapshot(&acme()).is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn refreshing_entries_survive_sweeps() {
        let table = LeaseTable::with_retention(Duration::ZERO);
        let now = reference_time();
        let _guard = acquired(table.try_acquire(&acme(), now, false));
        table.sweep(now + chrono::Duration::days(30));
        assert!(matches!(table.try_acquire(&acme(), now, false), Acquire::InFlight(_)));
    }

    #[test]
    fn success_after_failures_resets_backoff() {
        let table = LeaseTable::new();
        let now = reference_time();
        let guard = acquired(table.try_acquire(&acme(), now, false));
        guard.fail(
            now,
            &RefreshConfig::default(),
            CycleOutcome::Failed(NotReadyReason::AllSourcesFailed),
        );

        let guard = acquired(table.try_acquire(&acme(), now, true));
        guard.succeed(now, record_for(&acme(), chrono::Duration::zero()));
        assert!(table.snapshot(&acme()).is_none());
    }
}
