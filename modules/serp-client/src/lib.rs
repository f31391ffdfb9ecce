pub mod error;
pub mod types;

pub use error::{Result, SerpError};
pub use types::{OrganicResult, SearchResponse};

use std::time::Duration;

const BASE_URL: &str = "https://serpapi.com";

/// SerpAPI answers a query with no hits with this message instead of an empty list.
const NO_RESULTS_MARKER: &str = "hasn't returned any results";

/// Marker SerpAPI uses when the account has no searches left.
const QUOTA_MARKER: &str = "run out of searches";

pub struct SerpClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl SerpClient {
    pub fn new(api_key: String) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(30))
    }

    pub fn with_timeout(api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
            timeout,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one Google search and return up to `num` organic results.
    pub async fn search(&self, query: &str, num: usize) -> Result<Vec<OrganicResult>> {
        let url = format!("{}/search.json", self.base_url);
        let num_param = num.to_string();
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("engine", "google"),
                ("q", query),
                ("num", num_param.as_str()),
                ("gl", "us"),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() == 429 {
            let body = resp.text().await.unwrap_or_default();
            return Err(SerpError::QuotaExceeded(body));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            if body.contains(QUOTA_MARKER) {
                return Err(SerpError::QuotaExceeded(body));
            }
            return Err(SerpError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let parsed: SearchResponse = serde_json::from_str(&body)?;

        if let Some(message) = parsed.error {
            if message.contains(NO_RESULTS_MARKER) {
                tracing::debug!(query, "SerpAPI returned no results");
                return Ok(Vec::new());
            }
            if message.contains(QUOTA_MARKER) {
                return Err(SerpError::QuotaExceeded(message));
            }
            return Err(SerpError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let mut results = parsed.organic_results;
        results.truncate(num);
        tracing::info!(query, count = results.len(), "SerpAPI search complete");
        Ok(results)
    }
}
