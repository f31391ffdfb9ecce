//! Composite scoring of a merged profile.
//!
//! Pure: the reference time for every recency rule is the profile's
//! `merged_at`, so the same profile always scores the same. Missing inputs
//! contribute 0.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use url::Url;

use dcp_common::{AffiliationStatus, MergedProfile, ProfileField, Score, ScoringWeights};

// --- Sub-score weights ---

const W_DIRECT_AFFILIATION: f64 = 0.50;
const W_GRADUATION_RECENCY: f64 = 0.20;
const W_DEGREE_RELEVANCE: f64 = 0.15;
const W_ROLE_IMPORTANCE: f64 = 0.15;

const W_FUNDING_STAGE: f64 = 0.30;
const W_RECENT_FUNDING: f64 = 0.25;
const W_INDUSTRY_GROWTH: f64 = 0.25;
const W_MARKET_SIZE: f64 = 0.20;

const W_CONTENT_RECENCY: f64 = 0.40;
const W_ACTIONABILITY: f64 = 0.40;
const W_SOURCE_CREDIBILITY: f64 = 0.20;

// --- Vocabularies ---

const BUSINESS_DEGREE_TERMS: &[&str] = &["business", "mba", "management", "finance", "economics"];
const TECHNICAL_DEGREE_TERMS: &[&str] = &["engineering", "computer", "tech", "science"];

const TOP_ROLES: &[&str] = &["founder", "ceo", "cto", "president", "chief"];
const SENIOR_ROLES: &[&str] = &["vp", "vice president", "executive", "director", "head"];
const MID_ROLES: &[&str] = &["manager", "lead", "principal"];

const HIGH_GROWTH_INDUSTRIES: &[&str] = &[
    "ai",
    "artificial intelligence",
    "machine learning",
    "biotech",
    "healthcare",
    "health tech",
    "fintech",
    "cleantech",
    "climate",
    "saas",
    "software",
    "cloud",
    "cybersecurity",
    "robotics",
];

const RELIABLE_DOMAINS: &[&str] = &[
    "linkedin.com",
    "crunchbase.com",
    "pitchbook.com",
    "bloomberg.com",
    "techcrunch.com",
    "wsj.com",
    "ft.com",
    "reuters.com",
    "duke.edu",
];

/// Funding within this many days counts as recent.
const RECENT_FUNDING_DAYS: i64 = 180;

#[derive(Debug, Clone, Default)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn score(&self, profile: &MergedProfile) -> Score {
        let affiliation = affiliation_score(profile);
        let potential = potential_score(profile);
        let relevance = relevance_score(profile);
        let composite = (self.weights.affiliation * affiliation
            + self.weights.potential * potential
            + self.weights.relevance * relevance)
            .clamp(0.0, 100.0);

        Score {
            affiliation,
            potential,
            relevance,
            composite,
            computed_at: profile.merged_at,
        }
    }
}

fn to_scale(weighted: f64) -> f64 {
    (weighted * 100.0).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Affiliation
// ---------------------------------------------------------------------------

pub fn affiliation_score(profile: &MergedProfile) -> f64 {
    let flagged = profile.flag(ProfileField::DukeAffiliated) == Some(true);
    let via_people = people_affiliation(profile);
    if !flagged && via_people == 0.0 {
        return 0.0;
    }
    let reference_year = profile.merged_at.year();
    let direct = if flagged {
        direct_affiliation(profile).max(via_people)
    } else {
        via_people
    };

    to_scale(
        W_DIRECT_AFFILIATION * direct
            + W_GRADUATION_RECENCY * graduation_recency(profile, reference_year)
            + W_DEGREE_RELEVANCE * degree_relevance(profile)
            + W_ROLE_IMPORTANCE * role_importance(profile).max(affiliated_people_role(profile)),
    )
}

/// Direct affiliation a company earns through the people it lists.
fn people_affiliation(profile: &MergedProfile) -> f64 {
    match profile.people().map(AffiliationStatus::for_company) {
        Some(AffiliationStatus::Confirmed) => 1.0,
        Some(AffiliationStatus::PleaseReview) => 0.4,
        Some(AffiliationStatus::No) | None => 0.0,
    }
}

/// Most senior title among the company's confirmed Duke people.
fn affiliated_people_role(profile: &MergedProfile) -> f64 {
    profile
        .people()
        .unwrap_or_default()
        .iter()
        .filter(|p| p.duke_status == AffiliationStatus::Confirmed)
        .map(|p| title_importance(p.title.as_deref()))
        .fold(0.0, f64::max)
}

fn direct_affiliation(profile: &MergedProfile) -> f64 {
    let strength = match profile
        .text(ProfileField::DukeConnectionType)
        .map(str::to_lowercase)
    {
        Some(t) if t.contains("alum") || t.contains("graduate") => 1.0,
        Some(t) if t.contains("faculty") || t.contains("professor") => 0.8,
        Some(t) if t.contains("student") => 0.7,
        _ => 0.5,
    };
    let confidence = profile
        .number(ProfileField::DukeAffiliationConfidence)
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    strength * confidence
}

fn graduation_recency(profile: &MergedProfile, reference_year: i32) -> f64 {
    let Some(year) = profile.number(ProfileField::GraduationYear) else {
        return 0.0;
    };
    match reference_year - year as i32 {
        ..=5 => 1.0,
        6..=10 => 0.75,
        11..=20 => 0.5,
        _ => 0.25,
    }
}

fn degree_relevance(profile: &MergedProfile) -> f64 {
    match profile.text(ProfileField::DukeDegree).map(str::to_lowercase) {
        None => 0.0,
        Some(d) if contains_any(&d, BUSINESS_DEGREE_TERMS) => 1.0,
        Some(d) if contains_any(&d, TECHNICAL_DEGREE_TERMS) => 0.75,
        Some(_) => 0.25,
    }
}

fn role_importance(profile: &MergedProfile) -> f64 {
    title_importance(profile.text(ProfileField::CurrentRole))
}

fn title_importance(title: Option<&str>) -> f64 {
    match title.map(str::to_lowercase) {
        None => 0.0,
        Some(r) if contains_any_word(&r, TOP_ROLES) => 1.0,
        Some(r) if contains_any_word(&r, SENIOR_ROLES) => 0.8,
        Some(r) if contains_any_word(&r, MID_ROLES) => 0.6,
        Some(_) => 0.4,
    }
}

// ---------------------------------------------------------------------------
// Potential
// ---------------------------------------------------------------------------

pub fn potential_score(profile: &MergedProfile) -> f64 {
    let today = profile.merged_at.date_naive();
    to_scale(
        W_FUNDING_STAGE * funding_stage(profile)
            + W_RECENT_FUNDING * recent_funding(profile, today)
            + W_INDUSTRY_GROWTH * industry_growth(profile)
            + W_MARKET_SIZE * market_size(profile),
    )
}

fn funding_stage(profile: &MergedProfile) -> f64 {
    let Some(stage) = profile.text(ProfileField::FundingStage).map(str::to_lowercase) else {
        return 0.0;
    };
    if stage.contains("seed") {
        1.0
    } else if stage.contains("series a") {
        0.85
    } else if stage.contains("series b") {
        0.65
    } else if ["series c", "series d", "series e"].iter().any(|s| stage.contains(s)) {
        0.5
    } else if stage.contains("bootstrap") {
        0.6
    } else if ["growth", "late", "ipo", "public", "acquired"]
        .iter()
        .any(|s| stage.contains(s))
    {
        0.35
    } else {
        0.3
    }
}

fn recent_funding(profile: &MergedProfile, today: NaiveDate) -> f64 {
    let Some(date) = profile.date(ProfileField::LastFundingDate) else {
        return 0.0;
    };
    match (today - date).num_days() {
        ..=RECENT_FUNDING_DAYS => 1.0,
        181..=365 => 0.5,
        _ => 0.1,
    }
}

fn industry_growth(profile: &MergedProfile) -> f64 {
    match profile.text(ProfileField::Industry).map(str::to_lowercase) {
        None => 0.0,
        Some(i) if contains_any_word(&i, HIGH_GROWTH_INDUSTRIES) => 1.0,
        Some(_) => 0.5,
    }
}

fn market_size(profile: &MergedProfile) -> f64 {
    match profile.number(ProfileField::MarketSizeUsd) {
        None => 0.0,
        Some(usd) if usd >= 10e9 => 1.0,
        Some(usd) if usd >= 1e9 => 0.75,
        Some(usd) if usd >= 100e6 => 0.5,
        Some(usd) if usd > 0.0 => 0.25,
        Some(_) => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Relevance
// ---------------------------------------------------------------------------

pub fn relevance_score(profile: &MergedProfile) -> f64 {
    let today = profile.merged_at.date_naive();
    to_scale(
        W_CONTENT_RECENCY * content_recency(profile, today)
            + W_ACTIONABILITY * actionability(profile)
            + W_SOURCE_CREDIBILITY * source_credibility(profile),
    )
}

fn content_recency(profile: &MergedProfile, today: NaiveDate) -> f64 {
    let Some(date) = profile.date(ProfileField::ContentDate) else {
        return 0.0;
    };
    match (today - date).num_days() {
        ..=7 => 1.0,
        8..=30 => 0.75,
        31..=90 => 0.5,
        91..=365 => 0.25,
        _ => 0.1,
    }
}

fn actionability(profile: &MergedProfile) -> f64 {
    profile
        .number(ProfileField::Actionability)
        .map(|a| (a / 100.0).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

fn source_credibility(profile: &MergedProfile) -> f64 {
    let Some(links) = profile.list(ProfileField::SourceLinks) else {
        return 0.0;
    };
    let reliable: BTreeSet<&str> = links
        .iter()
        .filter_map(|link| Url::parse(link).ok())
        .filter_map(|url| {
            let host = url.host_str()?.to_lowercase();
            RELIABLE_DOMAINS
                .iter()
                .find(|d| host == **d || host.ends_with(&format!(".{d}")))
                .copied()
        })
        .collect();
    (reliable.len() as f64 * 0.5).min(1.0)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Like `contains_any`, but short needles must match whole words so "ai"
/// does not match "retail" and "cto" does not match "director".
fn contains_any_word(haystack: &str, needles: &[&str]) -> bool {
    let words: Vec<&str> = haystack
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    needles.iter().any(|needle| {
        if needle.contains(' ') || needle.len() > 4 {
            haystack.contains(needle)
        } else {
            words.contains(needle)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;
    use chrono::{TimeZone, Utc};
    use dcp_common::{EntityKey, FieldValue, PartialProfile, Person, SourceId, TrustRank};

    fn profile(fields: Vec<(ProfileField, FieldValue)>) -> MergedProfile {
        profile_for(EntityKey::founder("Jane Doe"), fields)
    }

    fn profile_for(key: EntityKey, fields: Vec<(ProfileField, FieldValue)>) -> MergedProfile {
        let mut p = PartialProfile::new(
            key.clone(),
            SourceId::WebSearch,
            TrustRank::Extracted,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        );
        for (field, value) in fields {
            p.insert(field, value, 0.9);
        }
        merge(&key, None, &[p])
    }

    fn person(name: &str, title: &str, duke_status: AffiliationStatus) -> Person {
        Person {
            name: name.into(),
            title: Some(title.into()),
            duke_status,
        }
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.into())
    }

    fn date(y: i32, m: u32, d: u32) -> FieldValue {
        FieldValue::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn empty_profile_scores_zero() {
        let s = Scorer::default().score(&profile(vec![]));
        assert_eq!((s.affiliation, s.potential, s.relevance, s.composite), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn affiliation_requires_duke_flag() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::DukeConnectionType, text("alumni")),
            (ProfileField::CurrentRole, text("CEO")),
        ]));
        assert_eq!(s.affiliation, 0.0);
    }

    #[test]
    fn recent_mba_founder_scores_full_affiliation() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::DukeAffiliated, FieldValue::Bool(true)),
            (ProfileField::DukeConnectionType, text("Alumni")),
            (ProfileField::GraduationYear, FieldValue::Number(2022.0)),
            (ProfileField::DukeDegree, text("MBA, Fuqua School of Business")),
            (ProfileField::CurrentRole, text("Co-Founder & CEO")),
        ]));
        assert!((s.affiliation - 100.0).abs() < 1e-9, "{}", s.affiliation);
    }

    #[test]
    fn affiliation_tiers_step_down() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::DukeAffiliated, FieldValue::Bool(true)),
            (ProfileField::DukeConnectionType, text("faculty")),
            (ProfileField::DukeAffiliationConfidence, FieldValue::Number(0.5)),
            (ProfileField::GraduationYear, FieldValue::Number(2008.0)),
            (ProfileField::DukeDegree, text("BS Computer Science")),
            (ProfileField::CurrentRole, text("Director of Product")),
        ]));
        // 0.5*0.8*0.5 + 0.2*0.5 + 0.15*0.75 + 0.15*0.8
        let expected = 100.0 * (0.2 + 0.1 + 0.1125 + 0.12);
        assert!((s.affiliation - expected).abs() < 1e-9, "{}", s.affiliation);
    }

    #[test]
    fn company_inherits_affiliation_from_confirmed_people() {
        let acme = EntityKey::company("Acme Inc");
        let s = Scorer::default().score(&profile_for(
            acme,
            vec![(
                ProfileField::People,
                FieldValue::People(vec![
                    person("Sam Roe", "Engineer", AffiliationStatus::No),
                    person("Jane Doe", "Co-Founder & CEO", AffiliationStatus::Confirmed),
                ]),
            )],
        ));
        // 0.5*1.0 direct + 0.15*1.0 for the confirmed CEO
        assert!((s.affiliation - 65.0).abs() < 1e-9, "{}", s.affiliation);
    }

    #[test]
    fn company_people_under_review_earn_partial_affiliation() {
        let review = profile_for(
            EntityKey::company("Acme Inc"),
            vec![(
                ProfileField::People,
                FieldValue::People(vec![person("Jane Doe", "CEO", AffiliationStatus::PleaseReview)]),
            )],
        );
        assert!((affiliation_score(&review) - 20.0).abs() < 1e-9);

        let none = profile_for(
            EntityKey::company("Acme Inc"),
            vec![(
                ProfileField::People,
                FieldValue::People(vec![person("Jane Doe", "CEO", AffiliationStatus::No)]),
            )],
        );
        assert_eq!(affiliation_score(&none), 0.0);
    }

    #[test]
    fn seed_stage_ai_company_recently_funded() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::FundingStage, text("Seed")),
            (ProfileField::LastFundingDate, date(2025, 3, 1)),
            (ProfileField::Industry, text("AI infrastructure")),
            (ProfileField::MarketSizeUsd, FieldValue::Number(12e9)),
        ]));
        assert!((s.potential - 100.0).abs() < 1e-9, "{}", s.potential);
    }

    #[test]
    fn stale_late_stage_company_scores_low_potential() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::FundingStage, text("Public (IPO 2015)")),
            (ProfileField::LastFundingDate, date(2015, 1, 1)),
            (ProfileField::Industry, text("Retail")),
            (ProfileField::MarketSizeUsd, FieldValue::Number(50e6)),
        ]));
        let expected = 100.0 * (0.3 * 0.35 + 0.25 * 0.1 + 0.25 * 0.5 + 0.2 * 0.25);
        assert!((s.potential - expected).abs() < 1e-9, "{}", s.potential);
    }

    #[test]
    fn relevance_combines_recency_actionability_and_sources() {
        let s = Scorer::default().score(&profile(vec![
            (ProfileField::ContentDate, date(2025, 5, 20)),
            (ProfileField::Actionability, FieldValue::Number(80.0)),
            (
                ProfileField::SourceLinks,
                FieldValue::List(vec![
                    "https://www.crunchbase.com/organization/acme".into(),
                    "https://techcrunch.com/2025/acme".into(),
                    "https://www.linkedin.com/company/acme".into(),
                    "not a url".into(),
                ]),
            ),
        ]));
        // 12 days old -> 0.75; 0.8 actionability; 3 reliable domains -> capped 1.0
        let expected = 100.0 * (0.4 * 0.75 + 0.4 * 0.8 + 0.2 * 1.0);
        assert!((s.relevance - expected).abs() < 1e-9, "{}", s.relevance);
    }

    #[test]
    fn lookalike_domains_are_not_reliable() {
        let p = profile(vec![(
            ProfileField::SourceLinks,
            FieldValue::List(vec!["https://notft.com/x".into(), "https://news.ft.com/y".into()]),
        )]);
        assert_eq!(source_credibility(&p), 0.5);
    }

    #[test]
    fn composite_uses_configured_weights() {
        let p = profile(vec![
            (ProfileField::DukeAffiliated, FieldValue::Bool(true)),
            (ProfileField::FundingStage, text("series b")),
            (ProfileField::Actionability, FieldValue::Number(50.0)),
        ]);
        let s = Scorer::default().score(&p);
        let expected = 0.4 * s.affiliation + 0.4 * s.potential + 0.2 * s.relevance;
        assert!((s.composite - expected).abs() < 1e-9);
        assert_eq!(s.computed_at, p.merged_at);
    }

    #[test]
    fn short_terms_match_whole_words_only() {
        assert!(!contains_any_word("retail", HIGH_GROWTH_INDUSTRIES));
        assert!(contains_any_word("generative ai tooling", HIGH_GROWTH_INDUSTRIES));
        assert!(!contains_any_word("director", TOP_ROLES));
    }
}
