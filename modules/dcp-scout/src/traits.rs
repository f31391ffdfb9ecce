// Trait seams between the engine and the outside world.
//
// WebSearcher and TimelineSource are the raw data sources the collectors
// drive. LanguageModel is the extractor's model endpoint. Each is implemented
// for the real client crate here and mocked in `testing`.

use anyhow::Result;
use async_trait::async_trait;

use ai_client::OpenAi;
use dcp_common::{CollectorFailure, SearchHit, SocialPost};
use nitter_client::{NitterClient, NitterError};
use serp_client::{SerpClient, SerpError};

/// Result of a single upstream call, already classified for retry decisions.
pub type SourceResult<T> = std::result::Result<T, CollectorFailure>;

// ---------------------------------------------------------------------------
// WebSearcher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, num: usize) -> SourceResult<Vec<SearchHit>>;
}

#[async_trait]
impl WebSearcher for SerpClient {
    async fn search(&self, query: &str, num: usize) -> SourceResult<Vec<SearchHit>> {
        let results = SerpClient::search(self, query, num)
            .await
            .map_err(|e| match e {
                SerpError::Timeout => CollectorFailure::Timeout(self.timeout()),
                SerpError::QuotaExceeded(msg) => CollectorFailure::QuotaExceeded(msg),
                SerpError::Network(msg) => CollectorFailure::Network(msg),
                other => CollectorFailure::Upstream(other.to_string()),
            })?;

        Ok(results
            .into_iter()
            .map(|r| SearchHit {
                title: r.title,
                url: r.link,
                snippet: r.snippet,
                date: r.date,
                query: query.to_string(),
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// TimelineSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait TimelineSource: Send + Sync {
    async fn timeline(&self, handle: &str, limit: usize) -> SourceResult<Vec<SocialPost>>;
}

#[async_trait]
impl TimelineSource for NitterClient {
    async fn timeline(&self, handle: &str, limit: usize) -> SourceResult<Vec<SocialPost>> {
        let tweets = NitterClient::timeline(self, handle, limit)
            .await
            .map_err(|e| match e {
                NitterError::Network(msg) => CollectorFailure::Network(msg),
                other => CollectorFailure::Upstream(other.to_string()),
            })?;

        Ok(tweets
            .into_iter()
            .map(|t| SocialPost {
                text: t.text,
                posted_at: t.posted_at,
                url: t.url,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// One model call returning raw JSON text shaped by `schema`.
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<String>;
}

#[async_trait]
impl LanguageModel for OpenAi {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<String> {
        self.structured_output(system, user, schema_name, schema).await
    }
}
