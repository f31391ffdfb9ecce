use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::error::DcpError;

// --- Entity identity ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    Founder,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Company => "company",
            EntityKind::Founder => "founder",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = DcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "company" => Ok(EntityKind::Company),
            "founder" => Ok(EntityKind::Founder),
            other => Err(DcpError::Validation(format!("unknown entity kind: {other}"))),
        }
    }
}

/// Normalized identity of a tracked company or founder.
///
/// Names are canonicalized on construction (trimmed, internal whitespace
/// collapsed, lowercased) so "Acme  Inc" and "acme inc" share a lease and a
/// stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    kind: EntityKind,
    name: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, name: &str) -> Self {
        Self {
            kind,
            name: canonicalize_name(name),
        }
    }

    pub fn company(name: &str) -> Self {
        Self::new(EntityKind::Company, name)
    }

    pub fn founder(name: &str) -> Self {
        Self::new(EntityKind::Founder, name)
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage and cache key, e.g. `company:acme inc`.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.kind, self.name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

pub fn canonicalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// --- Provenance ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    WebSearch,
    Social,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::WebSearch => "web_search",
            SourceId::Social => "social",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trust ordering used by the merger. Declaration order is the ranking:
/// later variants beat earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustRank {
    RawUnverified,
    PreviouslyStored,
    Extracted,
}

/// Where a resolved field value came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTag {
    pub source: SourceId,
    pub rank: TrustRank,
    pub observed_at: DateTime<Utc>,
}

// --- Profile fields ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Summary,
    Industry,
    Founded,
    Location,
    Website,
    FundingStage,
    LastFundingDate,
    TotalFundingUsd,
    MarketSizeUsd,
    Investors,
    DukeAffiliated,
    DukeConnectionType,
    DukeAffiliationConfidence,
    GraduationYear,
    DukeDegree,
    CurrentRole,
    TwitterHandle,
    ContentDate,
    SocialSummary,
    Actionability,
    Topics,
    SourceLinks,
    People,
}

impl ProfileField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Summary => "summary",
            ProfileField::Industry => "industry",
            ProfileField::Founded => "founded",
            ProfileField::Location => "location",
            ProfileField::Website => "website",
            ProfileField::FundingStage => "funding_stage",
            ProfileField::LastFundingDate => "last_funding_date",
            ProfileField::TotalFundingUsd => "total_funding_usd",
            ProfileField::MarketSizeUsd => "market_size_usd",
            ProfileField::Investors => "investors",
            ProfileField::DukeAffiliated => "duke_affiliated",
            ProfileField::DukeConnectionType => "duke_connection_type",
            ProfileField::DukeAffiliationConfidence => "duke_affiliation_confidence",
            ProfileField::GraduationYear => "graduation_year",
            ProfileField::DukeDegree => "duke_degree",
            ProfileField::CurrentRole => "current_role",
            ProfileField::TwitterHandle => "twitter_handle",
            ProfileField::ContentDate => "content_date",
            ProfileField::SocialSummary => "social_summary",
            ProfileField::Actionability => "actionability",
            ProfileField::Topics => "topics",
            ProfileField::SourceLinks => "source_links",
            ProfileField::People => "people",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Date(NaiveDate),
    List(Vec<String>),
    People(Vec<Person>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_people(&self) -> Option<&[Person]> {
        match self {
            FieldValue::People(people) => Some(people),
            _ => None,
        }
    }
}

/// How sure we are that a person is tied to Duke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffiliationStatus {
    Confirmed,
    PleaseReview,
    No,
}

impl AffiliationStatus {
    /// Company-level status from its people: any confirmed person confirms
    /// the company, otherwise any uncertain one puts it up for review.
    pub fn for_company(people: &[Person]) -> Self {
        if people.iter().any(|p| p.duke_status == AffiliationStatus::Confirmed) {
            AffiliationStatus::Confirmed
        } else if people.iter().any(|p| p.duke_status == AffiliationStatus::PleaseReview) {
            AffiliationStatus::PleaseReview
        } else {
            AffiliationStatus::No
        }
    }
}

impl FromStr for AffiliationStatus {
    type Err = DcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "confirmed" | "yes" => Ok(AffiliationStatus::Confirmed),
            "please review" | "review" | "unknown" => Ok(AffiliationStatus::PleaseReview),
            "no" | "none" => Ok(AffiliationStatus::No),
            other => Err(DcpError::Validation(format!("unknown affiliation status: {other}"))),
        }
    }
}

/// Someone associated with a company, as named in search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub title: Option<String>,
    pub duke_status: AffiliationStatus,
}

/// A single field value as produced by one source, before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub value: FieldValue,
    pub confidence: f64,
}

/// A field value after merging, carrying the tag of the source that won.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub value: FieldValue,
    pub confidence: f64,
    pub tag: SourceTag,
}

// --- Collector output ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub date: Option<String>,
    pub query: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialPost {
    pub text: String,
    pub posted_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawPayload {
    SearchResults { hits: Vec<SearchHit> },
    SocialPosts { handle: String, posts: Vec<SocialPost> },
}

/// Typed reason a collector gave up. Retries have already been exhausted
/// by the time one of these is recorded.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CollectorFailure {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("source returned no results")]
    EmptyResult,

    #[error("upstream error: {0}")]
    Upstream(String),
}

impl CollectorFailure {
    /// Quota and empty results will not change on an immediate retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            CollectorFailure::QuotaExceeded(_) | CollectorFailure::EmptyResult
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectOutcome {
    Success { payload: RawPayload },
    Failed { error: CollectorFailure },
}

/// Immutable result of one collector invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCollectorResult {
    pub source: SourceId,
    pub entity: EntityKey,
    pub fetched_at: DateTime<Utc>,
    pub attempts: u32,
    pub outcome: CollectOutcome,
}

impl RawCollectorResult {
    pub fn succeeded(
        source: SourceId,
        entity: EntityKey,
        fetched_at: DateTime<Utc>,
        attempts: u32,
        payload: RawPayload,
    ) -> Self {
        Self {
            source,
            entity,
            fetched_at,
            attempts,
            outcome: CollectOutcome::Success { payload },
        }
    }

    pub fn failed(
        source: SourceId,
        entity: EntityKey,
        fetched_at: DateTime<Utc>,
        attempts: u32,
        error: CollectorFailure,
    ) -> Self {
        Self {
            source,
            entity,
            fetched_at,
            attempts,
            outcome: CollectOutcome::Failed { error },
        }
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, CollectOutcome::Success { .. })
    }

    pub fn payload(&self) -> Option<&RawPayload> {
        match &self.outcome {
            CollectOutcome::Success { payload } => Some(payload),
            CollectOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&CollectorFailure> {
        match &self.outcome {
            CollectOutcome::Success { .. } => None,
            CollectOutcome::Failed { error } => Some(error),
        }
    }
}

// --- Extraction output ---

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExtractionFailure {
    #[error("collector result carried no payload")]
    NoPayload,

    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("model output failed validation: {0}")]
    Schema(String),
}

/// Typed fields one source contributed for one entity in one refresh cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialProfile {
    pub entity: EntityKey,
    pub source: SourceId,
    pub rank: TrustRank,
    pub produced_at: DateTime<Utc>,
    pub fields: BTreeMap<ProfileField, Observation>,
}

impl PartialProfile {
    pub fn new(
        entity: EntityKey,
        source: SourceId,
        rank: TrustRank,
        produced_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity,
            source,
            rank,
            produced_at,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: ProfileField, value: FieldValue, confidence: f64) -> Self {
        self.insert(field, value, confidence);
        self
    }

    pub fn insert(&mut self, field: ProfileField, value: FieldValue, confidence: f64) {
        self.fields.insert(
            field,
            Observation {
                value,
                confidence: confidence.clamp(0.0, 1.0),
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn tag(&self) -> SourceTag {
        SourceTag {
            source: self.source,
            rank: self.rank,
            observed_at: self.produced_at,
        }
    }
}

// --- Merged profile and score ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedProfile {
    pub entity: EntityKey,
    pub fields: BTreeMap<ProfileField, ResolvedField>,
    pub merged_at: DateTime<Utc>,
}

impl MergedProfile {
    pub fn get(&self, field: ProfileField) -> Option<&FieldValue> {
        self.fields.get(&field).map(|f| &f.value)
    }

    pub fn text(&self, field: ProfileField) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_text)
    }

    pub fn number(&self, field: ProfileField) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_number)
    }

    pub fn flag(&self, field: ProfileField) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn date(&self, field: ProfileField) -> Option<NaiveDate> {
        self.get(field).and_then(FieldValue::as_date)
    }

    pub fn list(&self, field: ProfileField) -> Option<&[String]> {
        self.get(field).and_then(FieldValue::as_list)
    }

    pub fn people(&self) -> Option<&[Person]> {
        self.get(ProfileField::People).and_then(FieldValue::as_people)
    }

    pub fn confidence(&self, field: ProfileField) -> Option<f64> {
        self.fields.get(&field).map(|f| f.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub affiliation: f64,
    pub potential: f64,
    pub relevance: f64,
    pub composite: f64,
    pub computed_at: DateTime<Utc>,
}

/// The persisted unit: a profile version and the score computed from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub profile: MergedProfile,
    pub score: Score,
    /// Completion time of the refresh cycle that produced this record.
    pub refreshed_at: DateTime<Utc>,
}

// --- Refresh state ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshStatus {
    Idle,
    Refreshing,
    FailedBackoff,
}

/// Point-in-time view of an entity's refresh bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshState {
    pub status: RefreshStatus,
    pub lease_token: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl RefreshState {
    pub fn idle() -> Self {
        Self {
            status: RefreshStatus::Idle,
            lease_token: None,
            started_at: None,
            last_success_at: None,
            last_failure_at: None,
            consecutive_failures: 0,
            next_attempt_at: None,
        }
    }
}
