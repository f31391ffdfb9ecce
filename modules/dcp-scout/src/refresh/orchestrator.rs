//! Freshness decisions and the refresh cycle.
//!
//! A lookup serves the stored record when it is younger than the staleness
//! threshold for its entity kind. Otherwise it competes for the entity's
//! lease and the winner runs collect, extract, merge, score and persist.
//! Losers follow the caller's conflict policy.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use dcp_common::{
    DcpError, EntityKey, PartialProfile, ProfileRecord, RawCollectorResult, RefreshConfig,
    RefreshState,
};

use super::lease::{Acquire, CycleOutcome, LeaseGuard, LeaseTable, OutcomeRx};
use super::{
    ConflictPolicy, Lookup, LookupOptions, NotReadyReason, ProfileView, RefreshIndicator,
    StalePolicy,
};
use crate::clock::{Clock, SystemClock};
use crate::collectors::{collect_bounded, Collector};
use crate::extraction::{raw_partial, Extraction, ProfileExtractor};
use crate::merge::merge;
use crate::scoring::Scorer;
use crate::store::ProfileStore;

/// Everything the orchestrator needs, wired once at startup.
#[derive(TypedBuilder)]
pub struct OrchestratorDeps {
    collectors: Vec<Arc<dyn Collector>>,
    extractor: Arc<dyn ProfileExtractor>,
    store: Arc<dyn ProfileStore>,
    #[builder(default = Arc::new(SystemClock))]
    clock: Arc<dyn Clock>,
    #[builder(default)]
    config: RefreshConfig,
    /// Hard deadline for each collector call.
    #[builder(default = Duration::from_secs(30))]
    collector_timeout: Duration,
    #[builder(default)]
    scorer: Scorer,
}

struct Inner {
    deps: OrchestratorDeps,
    leases: LeaseTable,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

enum CycleError {
    AllSourcesFailed,
    Persistence(String),
}

#[derive(Clone)]
pub struct RefreshOrchestrator {
    inner: Arc<Inner>,
}

impl RefreshOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            inner: Arc::new(Inner {
                leases: LeaseTable::with_retention(deps.config.backoff_cap),
                deps,
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn leases(&self) -> &LeaseTable {
        &self.inner.leases
    }

    /// Serve the profile for `key`, refreshing it first when needed.
    ///
    /// Errors only when nothing usable exists and persistence failed;
    /// every other failure is reported inside the returned `Lookup`.
    pub async fn lookup(
        &self,
        key: &EntityKey,
        options: LookupOptions,
    ) -> Result<Lookup, DcpError> {
        let inner = &self.inner;
        let now = inner.deps.clock.now();
        let stored = inner
            .deps
            .store
            .load_profile(key)
            .await
            .map_err(|e| DcpError::Persistence(e.to_string()))?;
        let fresh = stored.as_ref().is_some_and(|r| inner.is_fresh(key, r));

        if fresh && !options.force_refresh {
            info!(entity = %key, "Serving fresh profile");
            return Ok(ready(
                stored,
                true,
                RefreshIndicator::None,
                key,
                NotReadyReason::InProgress,
            ));
        }

        if inner.shutdown.is_cancelled() {
            return Ok(ready(
                stored,
                fresh,
                RefreshIndicator::None,
                key,
                NotReadyReason::Cancelled,
            ));
        }

        match inner.leases.try_acquire(key, now, options.force_refresh) {
            Acquire::BackingOff { next_attempt_at } => {
                info!(entity = %key, next_attempt_at = %next_attempt_at, "Refresh backing off");
                Ok(ready(
                    stored,
                    fresh,
                    RefreshIndicator::BackingOff { until: next_attempt_at },
                    key,
                    NotReadyReason::BackingOff { until: next_attempt_at },
                ))
            }
            Acquire::InFlight(rx) => match options.conflict_policy() {
                ConflictPolicy::ReturnStale => Ok(ready(
                    stored,
                    fresh,
                    RefreshIndicator::InProgress,
                    key,
                    NotReadyReason::InProgress,
                )),
                ConflictPolicy::Wait => {
                    info!(entity = %key, "Waiting on in-flight refresh");
                    let outcome = wait_for_outcome(rx).await;
                    resolve(key, outcome, stored, fresh)
                }
            },
            Acquire::Acquired(guard) => {
                // A cycle may have committed between the read above and the
                // acquire, so decide and merge against what is stored now.
                let stored = match inner.deps.store.load_profile(key).await {
                    Ok(current) => current,
                    Err(e) => {
                        guard.cancel();
                        return resolve(
                            key,
                            CycleOutcome::PersistenceFailed(e.to_string()),
                            stored,
                            fresh,
                        );
                    }
                };
                let fresh = stored.as_ref().is_some_and(|r| inner.is_fresh(key, r));
                if let Some(record) = stored.as_ref().filter(|_| fresh && !options.force_refresh) {
                    info!(entity = %key, "Profile refreshed meanwhile, serving it");
                    guard.succeed(record.refreshed_at, record.clone());
                    return Ok(ready(
                        stored,
                        true,
                        RefreshIndicator::None,
                        key,
                        NotReadyReason::InProgress,
                    ));
                }

                if options.stale_policy == StalePolicy::Background && stored.is_some() {
                    let task_inner = Arc::clone(inner);
                    let task_stored = stored.clone();
                    inner.tasks.spawn(async move {
                        task_inner.run_cycle(guard, task_stored).await;
                    });
                    return Ok(ready(
                        stored,
                        fresh,
                        RefreshIndicator::Scheduled,
                        key,
                        NotReadyReason::InProgress,
                    ));
                }
                let outcome = inner.run_cycle(guard, stored.clone()).await;
                resolve(key, outcome, stored, fresh)
            }
        }
    }

    /// Current refresh bookkeeping for `key`. Idle keys report the stored
    /// record's refresh time as their last success.
    pub async fn refresh_status(&self, key: &EntityKey) -> Result<RefreshState, DcpError> {
        let mut state = self
            .inner
            .leases
            .snapshot(key)
            .unwrap_or_else(RefreshState::idle);
        if let Some(record) = self
            .inner
            .deps
            .store
            .load_profile(key)
            .await
            .map_err(|e| DcpError::Persistence(e.to_string()))?
        {
            state.last_success_at = state.last_success_at.max(Some(record.refreshed_at));
        }
        Ok(state)
    }

    /// Stop accepting background work and wait for scheduled refreshes to
    /// finish and persist.
    pub async fn drain(&self) {
        info!("Draining background refreshes");
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    /// Cancel in-flight cycles and wait for background refreshes to stop.
    /// Cancelled cycles release their lease and persist nothing.
    pub async fn shutdown(&self) {
        info!("Refresh orchestrator shutting down");
        self.inner.shutdown.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl Inner {
    fn is_fresh(&self, key: &EntityKey, record: &ProfileRecord) -> bool {
        let threshold = self.deps.config.staleness_for(key.kind());
        let age = self.deps.clock.now() - record.refreshed_at;
        age.to_std().map_or(true, |age| age < threshold)
    }

    /// Run one cycle under the lease and settle the lease with its outcome.
    async fn run_cycle(&self, guard: LeaseGuard, stored: Option<ProfileRecord>) -> CycleOutcome {
        let key = guard.key().clone();
        let timeout = self.deps.config.cycle_timeout;
        info!(entity = %key, token = %guard.token(), "Refresh cycle started");

        let result = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            r = tokio::time::timeout(timeout, self.cycle(&key, stored.as_ref())) => Some(r),
        };

        let now = self.deps.clock.now();
        match result {
            None => {
                warn!(entity = %key, "Refresh cycle cancelled");
                guard.cancel();
                CycleOutcome::Failed(NotReadyReason::Cancelled)
            }
            Some(Ok(Ok(record))) => {
                info!(
                    entity = %key,
                    fields = record.profile.fields.len(),
                    composite = record.score.composite,
                    "Refresh cycle complete"
                );
                guard.succeed(now, record.clone());
                CycleOutcome::Refreshed(record)
            }
            Some(Ok(Err(CycleError::AllSourcesFailed))) => {
                warn!(entity = %key, "Refresh cycle failed: all sources failed");
                let outcome = CycleOutcome::Failed(NotReadyReason::AllSourcesFailed);
                guard.fail(now, &self.deps.config, outcome.clone());
                outcome
            }
            Some(Ok(Err(CycleError::Persistence(message)))) => {
                error!(entity = %key, error = message.as_str(), "Refresh cycle failed to persist");
                let outcome = CycleOutcome::PersistenceFailed(message);
                guard.fail(now, &self.deps.config, outcome.clone());
                outcome
            }
            Some(Err(_)) => {
                warn!(entity = %key, timeout_ms = timeout.as_millis() as u64, "Refresh cycle timed out");
                let outcome = CycleOutcome::Failed(NotReadyReason::TimedOut);
                guard.fail(now, &self.deps.config, outcome.clone());
                outcome
            }
        }
    }

    async fn cycle(
        &self,
        key: &EntityKey,
        stored: Option<&ProfileRecord>,
    ) -> Result<ProfileRecord, CycleError> {
        let deps = &self.deps;

        let raws: Vec<RawCollectorResult> = join_all(deps.collectors.iter().map(|collector| {
            collect_bounded(collector.as_ref(), key, deps.collector_timeout, deps.clock.as_ref())
        }))
        .await;

        for raw in raws.iter().filter(|r| !r.success()) {
            if let Some(error) = raw.error() {
                warn!(entity = %key, source = %raw.source, attempts = raw.attempts, error = %error, "Source failed");
            }
        }
        let collected: Vec<&RawCollectorResult> = raws.iter().filter(|r| r.success()).collect();

        let extractions = join_all(collected.iter().map(|raw| deps.extractor.extract(raw))).await;
        let mut partials: Vec<PartialProfile> = extractions
            .into_iter()
            .filter_map(|extraction| match extraction {
                Extraction::Profile(partial) => Some(partial),
                Extraction::Failed(_) => None,
            })
            .collect();

        if partials.is_empty() {
            return Err(CycleError::AllSourcesFailed);
        }
        partials.extend(collected.iter().filter_map(|raw| raw_partial(raw)));

        let profile = merge(key, stored.map(|r| &r.profile), &partials);
        let score = deps.scorer.score(&profile);
        let now = deps.clock.now();
        let refreshed_at = stored.map_or(now, |r| r.refreshed_at.max(now));
        let record = ProfileRecord {
            profile,
            score,
            refreshed_at,
        };

        deps.store
            .save_profile(&record)
            .await
            .map_err(|e| CycleError::Persistence(e.to_string()))?;
        Ok(record)
    }
}

async fn wait_for_outcome(mut rx: OutcomeRx) -> CycleOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => outcome
            .clone()
            .unwrap_or(CycleOutcome::Failed(NotReadyReason::Cancelled)),
        Err(_) => CycleOutcome::Failed(NotReadyReason::Cancelled),
    }
}

/// Serve `stored` with `indicator`, or report `reason` when nothing is stored.
fn ready(
    stored: Option<ProfileRecord>,
    is_fresh: bool,
    indicator: RefreshIndicator,
    key: &EntityKey,
    reason: NotReadyReason,
) -> Lookup {
    match stored {
        Some(record) => Lookup::Ready(ProfileView::from_record(record, is_fresh, indicator)),
        None => Lookup::NotYetAvailable {
            entity: key.clone(),
            reason,
        },
    }
}

fn resolve(
    key: &EntityKey,
    outcome: CycleOutcome,
    stored: Option<ProfileRecord>,
    fresh: bool,
) -> Result<Lookup, DcpError> {
    match outcome {
        CycleOutcome::Refreshed(record) => Ok(Lookup::Ready(ProfileView::from_record(
            record,
            true,
            RefreshIndicator::None,
        ))),
        CycleOutcome::Failed(reason) => Ok(ready(
            stored,
            fresh,
            RefreshIndicator::Failed {
                reason: reason.clone(),
            },
            key,
            reason,
        )),
        CycleOutcome::PersistenceFailed(message) => match stored {
            Some(record) => Ok(Lookup::Ready(ProfileView::from_record(
                record,
                fresh,
                RefreshIndicator::Failed {
                    reason: NotReadyReason::PersistenceFailed,
                },
            ))),
            None => Err(DcpError::Persistence(message)),
        },
    }
}
