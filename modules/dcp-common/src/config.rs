use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::{DcpError, Result};
use crate::types::EntityKind;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Upstream services
    pub serpapi_key: String,
    pub openai_api_key: String,
    pub nitter_instances: Vec<String>,

    // Storage
    pub database_url: Option<String>,

    // Engine
    pub refresh: RefreshConfig,
    pub collector: CollectorConfig,
    pub extractor: ExtractorConfig,
    pub scoring: ScoringWeights,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let refresh = RefreshConfig {
            company_staleness: env_secs("CACHE_COMPANY_TTL", 86_400)?,
            founder_staleness: env_secs("CACHE_FOUNDER_TTL", 86_400)?,
            backoff_base: env_secs("REFRESH_BACKOFF_BASE_SECS", 60)?,
            backoff_cap: env_secs("REFRESH_BACKOFF_CAP_SECS", 3_600)?,
            cycle_timeout: env_secs("REFRESH_CYCLE_TIMEOUT", 120)?,
        };

        let collector = CollectorConfig {
            timeout: env_secs("SCRAPER_TIMEOUT", 30)?,
            max_attempts: env_parse("SCRAPER_MAX_RETRIES", 3)?,
            retry_base: env_secs("SCRAPER_RETRY_BASE_SECS", 2)?,
            ..CollectorConfig::default()
        };

        let extractor = ExtractorConfig {
            timeout: env_secs("EXTRACTOR_TIMEOUT", 60)?,
            model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            ..ExtractorConfig::default()
        };

        let scoring = ScoringWeights {
            affiliation: env_parse("SCORE_WEIGHT_AFFILIATION", 0.4)?,
            potential: env_parse("SCORE_WEIGHT_POTENTIAL", 0.4)?,
            relevance: env_parse("SCORE_WEIGHT_RELEVANCE", 0.2)?,
        };
        scoring.validate()?;
        refresh.validate()?;

        let nitter_instances = env::var("TWITTER_NITTER_INSTANCES")
            .unwrap_or_else(|_| "https://nitter.net".to_string())
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            serpapi_key: required_env("SERPAPI_KEY")?,
            openai_api_key: required_env("OPENAI_API_KEY")?,
            nitter_instances,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            refresh,
            collector,
            extractor,
            scoring,
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            serpapi_key = %redact(&self.serpapi_key),
            openai_api_key = %redact(&self.openai_api_key),
            nitter_instances = ?self.nitter_instances,
            database = self.database_url.is_some(),
            model = %self.extractor.model,
            company_staleness_secs = self.refresh.company_staleness.as_secs(),
            founder_staleness_secs = self.refresh.founder_staleness.as_secs(),
            collector_timeout_secs = self.collector.timeout.as_secs(),
            max_attempts = self.collector.max_attempts,
            "Configuration loaded"
        );
    }
}

// --- Engine sub-configs ---

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub company_staleness: Duration,
    pub founder_staleness: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Upper bound on one whole collect/extract/merge/persist cycle.
    pub cycle_timeout: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            company_staleness: Duration::from_secs(24 * 3_600),
            founder_staleness: Duration::from_secs(24 * 3_600),
            backoff_base: Duration::from_secs(60),
            backoff_cap: Duration::from_secs(3_600),
            cycle_timeout: Duration::from_secs(120),
        }
    }
}

impl RefreshConfig {
    pub fn staleness_for(&self, kind: EntityKind) -> Duration {
        match kind {
            EntityKind::Company => self.company_staleness,
            EntityKind::Founder => self.founder_staleness,
        }
    }

    pub fn with_staleness(mut self, kind: EntityKind, threshold: Duration) -> Self {
        match kind {
            EntityKind::Company => self.company_staleness = threshold,
            EntityKind::Founder => self.founder_staleness = threshold,
        }
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_cycle_timeout(mut self, timeout: Duration) -> Self {
        self.cycle_timeout = timeout;
        self
    }

    /// Delay before the next automatic attempt after `consecutive_failures`
    /// failed cycles: base doubled per extra failure, capped.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            return Duration::ZERO;
        }
        let exp = (consecutive_failures - 1).min(31);
        self.backoff_base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    fn validate(&self) -> Result<()> {
        if self.backoff_base > self.backoff_cap {
            return Err(DcpError::Config(
                "REFRESH_BACKOFF_BASE_SECS must not exceed REFRESH_BACKOFF_CAP_SECS".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base: Duration,
    pub retry_cap: Duration,
    pub results_per_query: usize,
    pub max_posts: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base: Duration::from_secs(2),
            retry_cap: Duration::from_secs(10),
            results_per_query: 5,
            max_posts: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub timeout: Duration,
    pub model: String,
    pub max_input_bytes: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            model: "gpt-4o-mini".to_string(),
            max_input_bytes: 30_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub affiliation: f64,
    pub potential: f64,
    pub relevance: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            affiliation: 0.4,
            potential: 0.4,
            relevance: 0.2,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<()> {
        let parts = [self.affiliation, self.potential, self.relevance];
        if parts.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(DcpError::Config("scoring weights must be non-negative".into()));
        }
        let sum: f64 = parts.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return Err(DcpError::Config(format!(
                "scoring weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

// --- Env helpers ---

fn required_env(key: &str) -> Result<String> {
    env::var(key).map_err(|_| DcpError::Config(format!("{key} environment variable is required")))
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| DcpError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> Result<Duration> {
    env_parse(key, default).map(Duration::from_secs)
}

fn redact(secret: &str) -> String {
    if secret.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = secret.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("****{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let cfg = RefreshConfig::default();
        assert_eq!(cfg.backoff_for(0), Duration::ZERO);
        assert_eq!(cfg.backoff_for(1), Duration::from_secs(60));
        assert_eq!(cfg.backoff_for(2), Duration::from_secs(120));
        assert_eq!(cfg.backoff_for(3), Duration::from_secs(240));
        assert_eq!(cfg.backoff_for(7), Duration::from_secs(3_600));
        assert_eq!(cfg.backoff_for(40), Duration::from_secs(3_600));
    }

    #[test]
    fn staleness_is_per_kind() {
        let cfg = RefreshConfig::default()
            .with_staleness(EntityKind::Founder, Duration::from_secs(3_600));
        assert_eq!(cfg.staleness_for(EntityKind::Founder), Duration::from_secs(3_600));
        assert_eq!(cfg.staleness_for(EntityKind::Company), Duration::from_secs(86_400));
    }

    #[test]
    fn default_weights_are_valid() {
        assert!(ScoringWeights::default().validate().is_ok());
    }

    #[test]
    fn weights_not_summing_to_one_are_rejected() {
        let w = ScoringWeights {
            affiliation: 0.5,
            potential: 0.5,
            relevance: 0.5,
        };
        assert!(matches!(w.validate(), Err(DcpError::Config(_))));
    }

    #[test]
    fn redact_keeps_only_the_tail() {
        assert_eq!(redact("sk-abcdef1234"), "****1234");
        assert_eq!(redact("abc"), "****");
    }
}
