mod prompts;
pub mod schema;

pub use schema::{SearchFacts, SocialFacts};

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use ai_client::util::{json_object_span, strip_code_blocks, truncate_to_char_boundary};
use ai_client::StructuredOutput;
use async_trait::async_trait;
use regex::Regex;
use tracing::{info, warn};

use dcp_common::{
    ExtractionFailure, ExtractorConfig, FieldValue, PartialProfile, ProfileField,
    RawCollectorResult, RawPayload, TrustRank,
};

use crate::clock::Clock;
use crate::traits::LanguageModel;

/// Outcome of extracting one raw bundle. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Profile(PartialProfile),
    Failed(ExtractionFailure),
}

#[async_trait]
pub trait ProfileExtractor: Send + Sync {
    async fn extract(&self, raw: &RawCollectorResult) -> Extraction;
}

// ---------------------------------------------------------------------------
// LlmExtractor
// ---------------------------------------------------------------------------

/// Turns raw collector bundles into typed partial profiles with one model
/// call, retrying once with a stricter instruction when the answer does not
/// validate.
pub struct LlmExtractor {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_input_bytes: usize,
    clock: Arc<dyn Clock>,
}

impl LlmExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, config: &ExtractorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            model,
            timeout: config.timeout,
            max_input_bytes: config.max_input_bytes,
            clock,
        }
    }

    async fn ask<T, V>(&self, system: &str, user: &str, validate: V) -> Result<T, ExtractionFailure>
    where
        T: StructuredOutput,
        V: Fn(&T) -> Result<(), String>,
    {
        let schema = T::openai_schema();
        let name = T::schema_name_for_openai();
        let user = truncate_to_char_boundary(user, self.max_input_bytes);

        let first = self.call::<T, _>(system, user, &name, &schema, &validate).await?;
        let rejection = match first {
            Ok(value) => return Ok(value),
            Err(reason) => reason,
        };

        warn!(schema = name.as_str(), reason = rejection.as_str(), "Model output rejected, retrying once");
        let retry_prompt = prompts::with_strict_retry(user, &rejection);
        match self.call::<T, _>(system, &retry_prompt, &name, &schema, &validate).await? {
            Ok(value) => Ok(value),
            Err(reason) => Err(ExtractionFailure::Schema(reason)),
        }
    }

    /// One model round trip. The outer error is a transport failure, the
    /// inner one a rejected answer.
    async fn call<T, V>(
        &self,
        system: &str,
        user: &str,
        name: &str,
        schema: &serde_json::Value,
        validate: &V,
    ) -> Result<Result<T, String>, ExtractionFailure>
    where
        T: StructuredOutput,
        V: Fn(&T) -> Result<(), String>,
    {
        let raw = self
            .model
            .complete_json(system, user, name, schema.clone())
            .await
            .map_err(|e| ExtractionFailure::Model(e.to_string()))?;
        Ok(parse_answer::<T>(&raw).and_then(|value| validate(&value).map(|_| value)))
    }

    async fn extract_payload(&self, raw: &RawCollectorResult, payload: &RawPayload) -> Result<PartialProfile, ExtractionFailure> {
        let today = self.clock.now().date_naive();
        let mut partial = PartialProfile::new(
            raw.entity.clone(),
            raw.source,
            TrustRank::Extracted,
            self.clock.now(),
        );

        match payload {
            RawPayload::SearchResults { hits } => {
                let user = prompts::search_prompt(&raw.entity, hits);
                let facts: SearchFacts = self
                    .ask(prompts::SEARCH_SYSTEM, &user, |f: &SearchFacts| f.validate(today))
                    .await?;
                facts.fill(&mut partial);
            }
            RawPayload::SocialPosts { handle, posts } => {
                let user = prompts::social_prompt(&raw.entity, handle, posts);
                let facts: SocialFacts = self
                    .ask(prompts::SOCIAL_SYSTEM, &user, SocialFacts::validate)
                    .await?;
                facts.fill(&mut partial);
            }
        }
        Ok(partial)
    }
}

#[async_trait]
impl ProfileExtractor for LlmExtractor {
    async fn extract(&self, raw: &RawCollectorResult) -> Extraction {
        let Some(payload) = raw.payload() else {
            return Extraction::Failed(ExtractionFailure::NoPayload);
        };

        match tokio::time::timeout(self.timeout, self.extract_payload(raw, payload)).await {
            Ok(Ok(partial)) => {
                info!(entity = %raw.entity, source = %raw.source, fields = partial.fields.len(), "Extraction complete");
                Extraction::Profile(partial)
            }
            Ok(Err(failure)) => {
                warn!(entity = %raw.entity, source = %raw.source, error = %failure, "Extraction failed");
                Extraction::Failed(failure)
            }
            Err(_) => {
                warn!(entity = %raw.entity, source = %raw.source, timeout_ms = self.timeout.as_millis() as u64, "Extraction timed out");
                Extraction::Failed(ExtractionFailure::Timeout(self.timeout))
            }
        }
    }
}

fn parse_answer<T: StructuredOutput>(raw: &str) -> Result<T, String> {
    let body = strip_code_blocks(raw);
    serde_json::from_str(body).or_else(|first_err| {
        json_object_span(body)
            .and_then(|span| serde_json::from_str(span).ok())
            .ok_or_else(|| format!("unparseable JSON: {first_err}"))
    })
}

// ---------------------------------------------------------------------------
// Raw-unverified facts
// ---------------------------------------------------------------------------

static RE_TWITTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.)?(?:twitter|x)\.com/([A-Za-z0-9_]{1,15})(?:[/?#]|$)")
        .expect("valid regex")
});

const TWITTER_SKIP: &[&str] = &["intent", "share", "hashtag", "search", "i", "home", "login"];

const MAX_SOURCE_LINKS: usize = 10;

/// Facts readable straight off a raw bundle without a model: result links,
/// a profile handle, the newest post date. Ranked below everything else.
pub fn raw_partial(raw: &RawCollectorResult) -> Option<PartialProfile> {
    let payload = raw.payload()?;
    let mut partial = PartialProfile::new(
        raw.entity.clone(),
        raw.source,
        TrustRank::RawUnverified,
        raw.fetched_at,
    );

    match payload {
        RawPayload::SearchResults { hits } => {
            let links: Vec<String> = hits
                .iter()
                .map(|h| h.url.clone())
                .take(MAX_SOURCE_LINKS)
                .collect();
            if !links.is_empty() {
                partial.insert(ProfileField::SourceLinks, FieldValue::List(links), 0.5);
            }
            let handle = hits.iter().find_map(|h| {
                RE_TWITTER
                    .captures(&h.url)
                    .map(|c| c[1].to_string())
                    .filter(|name| !TWITTER_SKIP.contains(&name.to_lowercase().as_str()))
            });
            if let Some(handle) = handle {
                partial.insert(ProfileField::TwitterHandle, FieldValue::Text(handle), 0.4);
            }
        }
        RawPayload::SocialPosts { handle, posts } => {
            partial.insert(ProfileField::TwitterHandle, FieldValue::Text(handle.clone()), 0.6);
            if let Some(newest) = posts.iter().filter_map(|p| p.posted_at).max() {
                partial.insert(
                    ProfileField::ContentDate,
                    FieldValue::Date(newest.date_naive()),
                    0.8,
                );
            }
        }
    }

    (!partial.is_empty()).then_some(partial)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        hit, post, reference_time, search_result, social_result, ManualClock, ScriptedModel,
    };
    use dcp_common::{CollectorFailure, EntityKey, SourceId};

    fn extractor(model: ScriptedModel) -> (LlmExtractor, Arc<ScriptedModel>) {
        let model = Arc::new(model);
        let ex = LlmExtractor::new(
            model.clone(),
            &ExtractorConfig::default(),
            Arc::new(ManualClock::default()),
        );
        (ex, model)
    }

    fn acme_search() -> RawCollectorResult {
        search_result(
            &EntityKey::company("Acme Inc"),
            vec![hit("https://acme.example", "Acme Inc")],
        )
    }

    #[tokio::test]
    async fn valid_answer_becomes_extracted_partial() {
        let (ex, model) = extractor(ScriptedModel::new().reply(
            r#"{"confidence": 0.9, "industry": "fintech", "funding_stage": "seed", "duke_affiliated": true}"#,
        ));

        match ex.extract(&acme_search()).await {
            Extraction::Profile(p) => {
                assert_eq!(p.rank, TrustRank::Extracted);
                assert_eq!(p.source, SourceId::WebSearch);
                assert_eq!(p.fields[&ProfileField::Industry].value, FieldValue::Text("fintech".into()));
                assert_eq!(p.fields[&ProfileField::DukeAffiliated].value, FieldValue::Bool(true));
            }
            other => panic!("expected profile, got {other:?}"),
        }
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_answer_is_retried_with_stricter_instruction() {
        let (ex, model) = extractor(
            ScriptedModel::new()
                .reply("Sure! Here is what I found about Acme.")
                .reply("```json\n{\"confidence\": 0.7, \"industry\": \"biotech\"}\n```"),
        );

        assert!(matches!(ex.extract(&acme_search()).await, Extraction::Profile(_)));
        assert_eq!(model.calls(), 2);
        assert!(model.prompts()[1].contains("previous answer was rejected"));
    }

    #[tokio::test]
    async fn second_rejection_is_an_extraction_failure() {
        let (ex, model) = extractor(
            ScriptedModel::new()
                .reply(r#"{"confidence": 3.0}"#)
                .reply(r#"{"confidence": 2.0}"#),
        );

        match ex.extract(&acme_search()).await {
            Extraction::Failed(ExtractionFailure::Schema(reason)) => {
                assert!(reason.contains("confidence"))
            }
            other => panic!("expected schema failure, got {other:?}"),
        }
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn transport_errors_are_not_retried() {
        let (ex, model) = extractor(ScriptedModel::new().fail("503 from model"));
        assert!(matches!(
            ex.extract(&acme_search()).await,
            Extraction::Failed(ExtractionFailure::Model(_))
        ));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_model_times_out() {
        let model = ScriptedModel::new()
            .reply(r#"{"confidence": 0.9}"#)
            .with_delay(Duration::from_secs(120));
        let (ex, _) = extractor(model);
        assert_eq!(
            ex.extract(&acme_search()).await,
            Extraction::Failed(ExtractionFailure::Timeout(Duration::from_secs(60)))
        );
    }

    #[tokio::test]
    async fn failed_collection_has_no_payload() {
        let (ex, model) = extractor(ScriptedModel::new());
        let raw = RawCollectorResult::failed(
            SourceId::Social,
            EntityKey::company("Acme"),
            chrono::Utc::now(),
            3,
            CollectorFailure::Timeout(Duration::from_secs(30)),
        );
        assert_eq!(ex.extract(&raw).await, Extraction::Failed(ExtractionFailure::NoPayload));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn social_posts_yield_actionability() {
        let (ex, _) = extractor(ScriptedModel::new().reply(
            r#"{"confidence": 0.8, "summary": "Raising a seed round", "actionability": 85, "topics": ["fundraising"]}"#,
        ));
        let raw = social_result(&EntityKey::company("Acme"), "acme", vec![post("We're raising!", 2)]);
        match ex.extract(&raw).await {
            Extraction::Profile(p) => {
                assert_eq!(p.fields[&ProfileField::Actionability].value, FieldValue::Number(85.0));
                assert_eq!(p.source, SourceId::Social);
            }
            other => panic!("expected profile, got {other:?}"),
        }
    }

    #[test]
    fn raw_partial_from_search_links() {
        let raw = search_result(
            &EntityKey::company("Acme"),
            vec![
                hit("https://twitter.com/intent/tweet?text=hi", "share"),
                hit("https://x.com/acme_hq/status/1", "Acme on X"),
                hit("https://crunchbase.com/organization/acme", "Crunchbase"),
            ],
        );
        let p = raw_partial(&raw).unwrap();
        assert_eq!(p.rank, TrustRank::RawUnverified);
        assert_eq!(p.fields[&ProfileField::TwitterHandle].value, FieldValue::Text("acme_hq".into()));
        assert_eq!(p.fields[&ProfileField::SourceLinks].value.as_list().unwrap().len(), 3);
    }

    #[test]
    fn raw_partial_from_posts_uses_newest_date() {
        let raw = social_result(
            &EntityKey::company("Acme"),
            "acme",
            vec![post("old", 40), post("new", 2), post("mid", 10)],
        );
        let p = raw_partial(&raw).unwrap();
        let newest = p.fields[&ProfileField::ContentDate].value.as_date().unwrap();
        let expected = (reference_time() - chrono::Duration::days(2)).date_naive();
        assert_eq!(newest, expected);
    }
}
