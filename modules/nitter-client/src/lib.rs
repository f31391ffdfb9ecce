pub mod error;
pub mod parse;
pub mod types;

pub use error::{NitterError, Result};
pub use parse::parse_timeline;
pub use types::Tweet;

use std::time::Duration;
use tracing::{debug, warn};

/// Reads public timelines through a rotating list of Nitter instances.
///
/// Instances come and go, so each request walks the list in order and the
/// first instance that serves a timeline wins.
pub struct NitterClient {
    client: reqwest::Client,
    instances: Vec<String>,
}

impl NitterClient {
    pub fn new(instances: Vec<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (compatible; dcp-scout/0.1)")
            .build()
            .unwrap_or_default();
        let instances = instances
            .into_iter()
            .map(|i| i.trim_end_matches('/').to_string())
            .filter(|i| !i.is_empty())
            .collect();
        Self { client, instances }
    }

    pub fn instances(&self) -> &[String] {
        &self.instances
    }

    /// Fetch up to `limit` recent tweets for `handle`.
    ///
    /// An instance that answers with an empty or missing timeline counts as a
    /// definitive empty answer only if no other instance has tweets.
    pub async fn timeline(&self, handle: &str, limit: usize) -> Result<Vec<Tweet>> {
        if self.instances.is_empty() {
            return Err(NitterError::NoInstances);
        }

        let handle = handle.trim_start_matches('@');
        let mut answered_empty = false;
        let mut last_error = String::new();

        for instance in &self.instances {
            match self.fetch_from(instance, handle, limit).await {
                Ok(tweets) if !tweets.is_empty() => {
                    debug!(instance, handle, count = tweets.len(), "Nitter timeline fetched");
                    return Ok(tweets);
                }
                Ok(_) => {
                    debug!(instance, handle, "Nitter instance returned empty timeline");
                    answered_empty = true;
                }
                Err(e) => {
                    warn!(instance, handle, error = %e, "Nitter instance failed");
                    last_error = e.to_string();
                }
            }
        }

        if answered_empty {
            return Ok(Vec::new());
        }
        Err(NitterError::AllInstancesFailed {
            tried: self.instances.len(),
            last_error,
        })
    }

    async fn fetch_from(&self, instance: &str, handle: &str, limit: usize) -> Result<Vec<Tweet>> {
        let url = format!("{instance}/{handle}");
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(NitterError::Api {
                status: status.as_u16(),
            });
        }

        let html = resp.text().await?;
        Ok(parse_timeline(&html, limit))
    }
}
