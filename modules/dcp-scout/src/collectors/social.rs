use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use dcp_common::{
    CollectorConfig, CollectorFailure, EntityKey, RawCollectorResult, RawPayload, SourceId,
};

use super::{Collector, RetryPolicy};
use crate::clock::Clock;
use crate::traits::TimelineSource;

static RE_NON_HANDLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9_]").expect("valid regex"));

/// Corporate suffixes dropped when guessing a company's handle.
const CORPORATE_SUFFIXES: &[&str] = &[
    "inc", "inc.", "llc", "corp", "corp.", "co", "co.", "ltd", "ltd.", "corporation",
    "incorporated", "company",
];

/// Twitter handles are at most 15 characters.
const MAX_HANDLE_LEN: usize = 15;

/// Best-guess handle for an entity name: suffixes removed, words joined,
/// anything outside `[a-z0-9_]` stripped.
pub fn derive_handle(name: &str) -> Option<String> {
    let joined: String = name
        .split_whitespace()
        .filter(|word| !CORPORATE_SUFFIXES.contains(word))
        .collect();
    let handle: String = RE_NON_HANDLE
        .replace_all(&joined.to_lowercase(), "")
        .chars()
        .take(MAX_HANDLE_LEN)
        .collect();
    (!handle.is_empty()).then_some(handle)
}

/// Pulls an entity's recent posts from a social timeline source.
pub struct SocialCollector {
    timelines: Arc<dyn TimelineSource>,
    policy: RetryPolicy,
    max_posts: usize,
    handle_overrides: HashMap<EntityKey, String>,
    clock: Arc<dyn Clock>,
}

impl SocialCollector {
    pub fn new(
        timelines: Arc<dyn TimelineSource>,
        config: &CollectorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            timelines,
            policy: RetryPolicy::from_config(config),
            max_posts: config.max_posts,
            handle_overrides: HashMap::new(),
            clock,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a known handle instead of deriving one from the name.
    pub fn with_handle(mut self, key: EntityKey, handle: &str) -> Self {
        self.handle_overrides
            .insert(key, handle.trim_start_matches('@').to_string());
        self
    }

    fn handle_for(&self, key: &EntityKey) -> Option<String> {
        self.handle_overrides
            .get(key)
            .cloned()
            .or_else(|| derive_handle(key.name()))
    }
}

#[async_trait]
impl Collector for SocialCollector {
    fn source(&self) -> SourceId {
        SourceId::Social
    }

    async fn collect(&self, key: &EntityKey) -> RawCollectorResult {
        let Some(handle) = self.handle_for(key) else {
            return RawCollectorResult::failed(
                self.source(),
                key.clone(),
                self.clock.now(),
                0,
                CollectorFailure::EmptyResult,
            );
        };

        let timelines = &self.timelines;
        let max_posts = self.max_posts;
        let handle_ref = handle.as_str();
        let (outcome, attempts) = self
            .policy
            .run(handle_ref, |_| async move {
                match timelines.timeline(handle_ref, max_posts).await {
                    Ok(posts) if posts.is_empty() => Err(CollectorFailure::EmptyResult),
                    other => other,
                }
            })
            .await;

        let fetched_at = self.clock.now();
        match outcome {
            Ok(posts) => {
                info!(entity = %key, handle = handle.as_str(), posts = posts.len(), "Social collection complete");
                RawCollectorResult::succeeded(
                    self.source(),
                    key.clone(),
                    fetched_at,
                    attempts,
                    RawPayload::SocialPosts { handle, posts },
                )
            }
            Err(error) => {
                RawCollectorResult::failed(self.source(), key.clone(), fetched_at, attempts, error)
            }
        }
    }
}
