pub mod retry;
pub mod search;
pub mod social;

pub use retry::RetryPolicy;
pub use search::{query_plan, WebSearchCollector};
pub use social::{derive_handle, SocialCollector};

use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use dcp_common::{CollectorFailure, EntityKey, RawCollectorResult, SourceId};

use crate::clock::Clock;

/// Fetches raw facts about an entity from one external source.
///
/// Implementations own their retries and never fail: every failure mode is
/// reported inside the returned `RawCollectorResult`.
#[async_trait]
pub trait Collector: Send + Sync {
    fn source(&self) -> SourceId;

    async fn collect(&self, key: &EntityKey) -> RawCollectorResult;
}

/// Run a collector under a hard deadline. A collector that overruns is
/// reported as a timeout failure and its work is dropped.
pub async fn collect_bounded(
    collector: &dyn Collector,
    key: &EntityKey,
    timeout: Duration,
    clock: &dyn Clock,
) -> RawCollectorResult {
    match tokio::time::timeout(timeout, collector.collect(key)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(
                entity = %key,
                source = %collector.source(),
                timeout_ms = timeout.as_millis() as u64,
                "Collector timed out"
            );
            RawCollectorResult::failed(
                collector.source(),
                key.clone(),
                clock.now(),
                0,
                CollectorFailure::Timeout(timeout),
            )
        }
    }
}
