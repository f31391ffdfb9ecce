// Test mocks for the refresh engine.
//
// One mock per trait boundary:
// - MockSearcher (WebSearcher) and MockTimelines (TimelineSource) feed the real collectors
// - ScriptedModel (LanguageModel) replays canned model answers to the real extractor
// - MockCollector (Collector) and MockExtractor (ProfileExtractor) drive the orchestrator
// - FlakyStore (ProfileStore) wraps the memory store with switchable save failures
//   and slow reads
// - ManualClock (Clock) only moves when told to
//
// Plus builders for hits, posts, raw results and stored records.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use dcp_common::{
    CollectorFailure, EntityKey, ExtractionFailure, FieldValue, MergedProfile, PartialProfile,
    ProfileField, ProfileRecord, RawCollectorResult, RawPayload, ResolvedField, SearchHit,
    SocialPost, SourceId, SourceTag, TrustRank,
};

use crate::clock::Clock;
use crate::collectors::Collector;
use crate::extraction::{Extraction, ProfileExtractor};
use crate::scoring::Scorer;
use crate::store::{MemoryProfileStore, ProfileStore};
use crate::traits::{LanguageModel, SourceResult, TimelineSource, WebSearcher};

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Fixed "now" shared by fixtures: 2025-06-01 12:00 UTC.
pub fn reference_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at(reference_time())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn hit(url: &str, title: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: String::new(),
        date: None,
        query: String::new(),
    }
}

/// A post published `days_ago` days before `reference_time()`.
pub fn post(text: &str, days_ago: i64) -> SocialPost {
    SocialPost {
        text: text.to_string(),
        posted_at: Some(reference_time() - chrono::Duration::days(days_ago)),
        url: None,
    }
}

pub fn search_result(key: &EntityKey, hits: Vec<SearchHit>) -> RawCollectorResult {
    RawCollectorResult::succeeded(
        SourceId::WebSearch,
        key.clone(),
        reference_time(),
        1,
        RawPayload::SearchResults { hits },
    )
}

pub fn social_result(key: &EntityKey, handle: &str, posts: Vec<SocialPost>) -> RawCollectorResult {
    RawCollectorResult::succeeded(
        SourceId::Social,
        key.clone(),
        reference_time(),
        1,
        RawPayload::SocialPosts {
            handle: handle.to_string(),
            posts,
        },
    )
}

/// A stored record refreshed `age` before `reference_time()`, with a couple
/// of extracted fields and a matching score.
pub fn record_for(key: &EntityKey, age: chrono::Duration) -> ProfileRecord {
    let refreshed_at = reference_time() - age;
    let tag = SourceTag {
        source: SourceId::WebSearch,
        rank: TrustRank::Extracted,
        observed_at: refreshed_at,
    };
    let mut fields = BTreeMap::new();
    fields.insert(
        ProfileField::Industry,
        ResolvedField {
            value: FieldValue::Text("fintech".into()),
            confidence: 0.9,
            tag: tag.clone(),
        },
    );
    fields.insert(
        ProfileField::DukeAffiliated,
        ResolvedField {
            value: FieldValue::Bool(true),
            confidence: 0.9,
            tag,
        },
    );
    let profile = MergedProfile {
        entity: key.clone(),
        fields,
        merged_at: refreshed_at,
    };
    let score = Scorer::default().score(&profile);
    ProfileRecord {
        profile,
        score,
        refreshed_at,
    }
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

/// Query-keyed search results. Unregistered queries return no hits.
#[derive(Default)]
pub struct MockSearcher {
    results: HashMap<String, Vec<SearchHit>>,
    failure: Option<CollectorFailure>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_query(mut self, query: &str, hits: Vec<SearchHit>) -> Self {
        self.results.insert(query.to_string(), hits);
        self
    }

    /// Every query fails with `failure`.
    pub fn failing_with(mut self, failure: CollectorFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[async_trait]
impl WebSearcher for MockSearcher {
    async fn search(&self, query: &str, num: usize) -> SourceResult<Vec<SearchHit>> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut hits = self.results.get(query).cloned().unwrap_or_default();
        hits.truncate(num);
        for hit in &mut hits {
            hit.query = query.to_string();
        }
        Ok(hits)
    }
}

// ---------------------------------------------------------------------------
// MockTimelines
// ---------------------------------------------------------------------------

/// Handle-keyed timelines. Unregistered handles have an empty timeline.
#[derive(Default)]
pub struct MockTimelines {
    timelines: HashMap<String, Vec<SocialPost>>,
}

impl MockTimelines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_handle(mut self, handle: &str, posts: Vec<SocialPost>) -> Self {
        self.timelines.insert(handle.to_string(), posts);
        self
    }
}

#[async_trait]
impl TimelineSource for MockTimelines {
    async fn timeline(&self, handle: &str, limit: usize) -> SourceResult<Vec<SocialPost>> {
        let mut posts = self.timelines.get(handle).cloned().unwrap_or_default();
        posts.truncate(limit);
        Ok(posts)
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Replays answers in order. Running past the script is an error.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, answer: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(answer.to_string()));
        self
    }

    /// Next call fails at the transport level.
    pub fn fail(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    /// User prompts received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete_json(
        &self,
        _system: &str,
        user: &str,
        _schema_name: &str,
        _schema: serde_json::Value,
    ) -> Result<String> {
        self.prompts.lock().unwrap().push(user.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("ScriptedModel: script exhausted"),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCollector
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Scripted {
    Payload(RawPayload),
    Failure(CollectorFailure),
}

/// Collector replaying a script of outcomes; the last entry repeats.
/// Results are stamped with `reference_time()`.
/// Tracks calls and the peak number of overlapping `collect` calls.
pub struct MockCollector {
    source: SourceId,
    script: Mutex<VecDeque<Scripted>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCollector {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(source: SourceId, payload: RawPayload) -> Self {
        Self::new(source).then_succeed(payload)
    }

    pub fn failing(source: SourceId, failure: CollectorFailure) -> Self {
        Self::new(source).then_fail(failure)
    }

    pub fn then_succeed(self, payload: RawPayload) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Payload(payload));
        self
    }

    pub fn then_fail(self, failure: CollectorFailure) -> Self {
        self.script.lock().unwrap().push_back(Scripted::Failure(failure));
        self
    }

    /// Sleep this long inside every `collect` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next(&self) -> Option<Scripted> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl Collector for MockCollector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn collect(&self, key: &EntityKey) -> RawCollectorResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.next();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let fetched_at = reference_time();
        match scripted {
            Some(Scripted::Payload(payload)) => {
                RawCollectorResult::succeeded(self.source, key.clone(), fetched_at, 1, payload)
            }
            Some(Scripted::Failure(failure)) => {
                RawCollectorResult::failed(self.source, key.clone(), fetched_at, 1, failure)
            }
            None => RawCollectorResult::failed(
                self.source,
                key.clone(),
                fetched_at,
                1,
                CollectorFailure::EmptyResult,
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// MockExtractor
// ---------------------------------------------------------------------------

/// Source-keyed extraction. Unregistered sources fail as a model error.
/// Produced partials are stamped with the raw result's fetch time.
#[derive(Default)]
pub struct MockExtractor {
    fields: HashMap<SourceId, Vec<(ProfileField, FieldValue, f64)>>,
    failures: HashMap<SourceId, ExtractionFailure>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_source(
        mut self,
        source: SourceId,
        fields: Vec<(ProfileField, FieldValue, f64)>,
    ) -> Self {
        self.fields.insert(source, fields);
        self
    }

    pub fn failing(mut self, source: SourceId, failure: ExtractionFailure) -> Self {
        self.failures.insert(source, failure);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileExtractor for MockExtractor {
    async fn extract(&self, raw: &RawCollectorResult) -> Extraction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if raw.payload().is_none() {
            return Extraction::Failed(ExtractionFailure::NoPayload);
        }
        if let Some(failure) = self.failures.get(&raw.source) {
            return Extraction::Failed(failure.clone());
        }
        let Some(fields) = self.fields.get(&raw.source) else {
            return Extraction::Failed(ExtractionFailure::Model("unscripted source".into()));
        };

        let mut partial = PartialProfile::new(
            raw.entity.clone(),
            raw.source,
            TrustRank::Extracted,
            raw.fetched_at,
        );
        for (field, value, confidence) in fields {
            partial.insert(*field, value.clone(), *confidence);
        }
        Extraction::Profile(partial)
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// Memory store whose saves can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryProfileStore,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
    read_delay: Option<Duration>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(self, record: ProfileRecord) -> Self {
        Self {
            inner: self.inner.with_record(record),
            ..self
        }
    }

    pub fn failing_saves(self) -> Self {
        self.fail_saves.store(true, Ordering::SeqCst);
        self
    }

    /// Reads take their snapshot first and return it after `delay`, so a
    /// concurrent save can land in between.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileStore for FlakyStore {
    async fn load_profile(&self, key: &EntityKey) -> Result<Option<ProfileRecord>> {
        let snapshot = self.inner.load_profile(key).await?;
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn save_profile(&self, record: &ProfileRecord) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("connection reset by peer");
        }
        self.inner.save_profile(record).await?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
