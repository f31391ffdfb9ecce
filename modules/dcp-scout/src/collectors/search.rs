use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use dcp_common::{
    CollectorConfig, CollectorFailure, EntityKey, EntityKind, RawCollectorResult, RawPayload,
    SourceId,
};

use super::{Collector, RetryPolicy};
use crate::clock::Clock;
use crate::traits::WebSearcher;

/// Search queries issued for an entity, in priority order.
pub fn query_plan(key: &EntityKey) -> Vec<String> {
    let name = key.name();
    match key.kind() {
        EntityKind::Company => vec![
            format!("{name} company overview"),
            format!("{name} valuation funding amount investors"),
            format!("{name} company history founded year"),
            format!("{name} co-founders leadership management team"),
            format!("{name} market size competitors industry"),
            format!("{name} twitter linkedin"),
        ],
        EntityKind::Founder => vec![
            format!("{name} professional background experience"),
            format!("{name} current role position"),
            format!("\"{name}\" \"Duke University\" alumni degree graduate"),
            format!("\"{name}\" \"Duke\" education history affiliation"),
            format!("{name} twitter linkedin profiles"),
        ],
    }
}

/// Runs the entity's query plan against a web search backend and bundles
/// the de-duplicated hits.
pub struct WebSearchCollector {
    searcher: Arc<dyn WebSearcher>,
    policy: RetryPolicy,
    results_per_query: usize,
    clock: Arc<dyn Clock>,
}

impl WebSearchCollector {
    pub fn new(
        searcher: Arc<dyn WebSearcher>,
        config: &CollectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            searcher,
            policy: RetryPolicy::from_config(config),
            results_per_query: config.results_per_query,
            clock,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[async_trait]
impl Collector for WebSearchCollector {
    fn source(&self) -> SourceId {
        SourceId::WebSearch
    }

    async fn collect(&self, key: &EntityKey) -> RawCollectorResult {
        let queries = query_plan(key);

        let outcomes = join_all(queries.iter().map(|query| {
            self.policy.run(query, move |_| self.searcher.search(query, self.results_per_query))
        }))
        .await;

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let mut attempts = 0;
        let mut answered = 0;
        let mut last_error = None;

        for (query, (outcome, tries)) in queries.iter().zip(outcomes) {
            attempts += tries;
            match outcome {
                Ok(results) => {
                    answered += 1;
                    for hit in results {
                        if seen.insert(hit.url.clone()) {
                            hits.push(hit);
                        }
                    }
                }
                Err(e) => {
                    warn!(entity = %key, query = query.as_str(), error = %e, "Search query failed");
                    last_error = Some(e);
                }
            }
        }

        let fetched_at = self.clock.now();
        if hits.is_empty() {
            let error = match (answered, last_error) {
                (0, Some(e)) => e,
                _ => CollectorFailure::EmptyResult,
            };
            return RawCollectorResult::failed(self.source(), key.clone(), fetched_at, attempts, error);
        }

        info!(
            entity = %key,
            queries = queries.len(),
            answered,
            hits = hits.len(),
            "Web search collection complete"
        );
        RawCollectorResult::succeeded(
            self.source(),
            key.clone(),
            fetched_at,
            attempts,
            RawPayload::SearchResults { hits },
        )
    }
}
