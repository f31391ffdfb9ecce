mod lease;
mod orchestrator;

pub use lease::{Acquire, CycleOutcome, LeaseGuard, LeaseTable};
pub use orchestrator::{OrchestratorDeps, RefreshOrchestrator};

use chrono::{DateTime, Utc};
use serde::Serialize;

use dcp_common::{EntityKey, MergedProfile, ProfileRecord, Score};

// --- Lookup policy ---

/// What to do when another cycle already holds the lease for the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Block until the in-flight cycle finishes and return its result.
    Wait,
    /// Return whatever is stored right now, flagged as refreshing.
    ReturnStale,
}

/// What to do when the stored profile is stale and the lease is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Run the cycle inline and return its result.
    #[default]
    Block,
    /// Return the stale profile now and refresh on a spawned task.
    /// Cold entities always block since there is nothing to return.
    Background,
}

#[derive(Debug, Clone, Default)]
pub struct LookupOptions {
    pub force_refresh: bool,
    /// `None` picks `Wait` for forced lookups, `ReturnStale` otherwise.
    pub on_conflict: Option<ConflictPolicy>,
    pub stale_policy: StalePolicy,
}

impl LookupOptions {
    pub fn forced() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_conflict(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = Some(policy);
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.on_conflict.unwrap_or(if self.force_refresh {
            ConflictPolicy::Wait
        } else {
            ConflictPolicy::ReturnStale
        })
    }
}

// --- Lookup results ---

/// Refresh activity accompanying a served profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RefreshIndicator {
    None,
    InProgress,
    /// A background refresh was started by this lookup.
    Scheduled,
    BackingOff { until: DateTime<Utc> },
    /// The refresh attempted by this lookup failed; the stored profile stands.
    Failed { reason: NotReadyReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NotReadyReason {
    InProgress,
    AllSourcesFailed,
    BackingOff { until: DateTime<Utc> },
    TimedOut,
    Cancelled,
    PersistenceFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileView {
    pub profile: MergedProfile,
    pub score: Score,
    pub refreshed_at: DateTime<Utc>,
    pub is_fresh: bool,
    pub refresh: RefreshIndicator,
}

impl ProfileView {
    fn from_record(record: ProfileRecord, is_fresh: bool, refresh: RefreshIndicator) -> Self {
        Self {
            profile: record.profile,
            score: record.score,
            refreshed_at: record.refreshed_at,
            is_fresh,
            refresh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Lookup {
    Ready(ProfileView),
    /// Nothing has ever been stored for the entity and no cycle produced data.
    NotYetAvailable {
        entity: EntityKey,
        reason: NotReadyReason,
    },
}

impl Lookup {
    pub fn view(&self) -> Option<&ProfileView> {
        match self {
            Lookup::Ready(view) => Some(view),
            Lookup::NotYetAvailable { .. } => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.view().is_some_and(|v| v.is_fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_policy_defaults_follow_force_flag() {
        assert_eq!(LookupOptions::default().conflict_policy(), ConflictPolicy::ReturnStale);
        assert_eq!(LookupOptions::forced().conflict_policy(), ConflictPolicy::Wait);
        assert_eq!(
            LookupOptions::forced()
                .with_conflict(ConflictPolicy::ReturnStale)
                .conflict_policy(),
            ConflictPolicy::ReturnStale
        );
    }
}
