use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::Deserialize;

use dcp_common::{AffiliationStatus, EntityKind, FieldValue, PartialProfile, Person, ProfileField};

/// Facts the model is asked to pull out of a bundle of search results.
/// Every field is optional; the model answers `null` when unsure.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchFacts {
    pub summary: Option<String>,
    pub industry: Option<String>,
    pub founded: Option<i32>,
    pub location: Option<String>,
    pub website: Option<String>,
    /// e.g. "pre-seed", "seed", "series a", "growth", "public", "acquired".
    pub funding_stage: Option<String>,
    /// ISO date, YYYY-MM-DD.
    pub last_funding_date: Option<String>,
    pub total_funding_usd: Option<f64>,
    pub market_size_usd: Option<f64>,
    #[serde(default)]
    pub investors: Vec<String>,
    pub duke_affiliated: Option<bool>,
    /// e.g. "alumni", "faculty", "student", "staff".
    pub duke_connection_type: Option<String>,
    pub duke_affiliation_confidence: Option<f64>,
    pub graduation_year: Option<i32>,
    pub duke_degree: Option<String>,
    pub current_role: Option<String>,
    pub twitter_handle: Option<String>,
    /// Founders, executives and other key people named for a company.
    #[serde(default)]
    pub people: Vec<PersonFacts>,
    /// Overall confidence in this extraction, 0 to 1.
    pub confidence: f64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PersonFacts {
    pub name: String,
    pub title: Option<String>,
    /// "confirmed", "please review" or "no".
    pub duke_affiliation_status: String,
}

/// Facts the model is asked to pull out of recent social posts.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SocialFacts {
    pub summary: Option<String>,
    /// How urgent or actionable the recent activity is for outreach, 0 to 100.
    pub actionability: Option<f64>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn check_unit(name: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(format!("{name} must be within 0..1, got {v}")),
        _ => Ok(()),
    }
}

fn check_non_negative(name: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(format!("{name} must be non-negative, got {v}")),
        _ => Ok(()),
    }
}

fn parse_iso_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("last_funding_date must be YYYY-MM-DD, got {raw:?}"))
}

impl SearchFacts {
    pub fn validate(&self, today: NaiveDate) -> Result<(), String> {
        check_unit("confidence", Some(self.confidence))?;
        check_unit("duke_affiliation_confidence", self.duke_affiliation_confidence)?;
        check_non_negative("total_funding_usd", self.total_funding_usd)?;
        check_non_negative("market_size_usd", self.market_size_usd)?;

        if let Some(year) = self.founded {
            if !(1800..=today.year()).contains(&year) {
                return Err(format!("founded year out of range: {year}"));
            }
        }
        if let Some(year) = self.graduation_year {
            if !(1930..=today.year() + 6).contains(&year) {
                return Err(format!("graduation_year out of range: {year}"));
            }
        }
        if let Some(raw) = non_blank(&self.last_funding_date) {
            let date = parse_iso_date(raw)?;
            if date > today {
                return Err(format!("last_funding_date is in the future: {date}"));
            }
        }
        for person in &self.people {
            person
                .duke_affiliation_status
                .parse::<AffiliationStatus>()
                .map_err(|e| format!("people[{}]: {e}", person.name))?;
        }
        Ok(())
    }

    /// Copy every populated fact into `partial`. Call after `validate`.
    pub fn fill(self, partial: &mut PartialProfile) {
        let c = self.confidence;
        let duke_c = self.duke_affiliation_confidence.unwrap_or(c);

        put_text(partial, ProfileField::Summary, self.summary, c);
        put_text(partial, ProfileField::Industry, self.industry, c);
        put_text(partial, ProfileField::Location, self.location, c);
        put_text(partial, ProfileField::Website, self.website, c);
        put_text(partial, ProfileField::FundingStage, self.funding_stage, c);
        put_text(partial, ProfileField::CurrentRole, self.current_role, c);
        put_text(partial, ProfileField::DukeConnectionType, self.duke_connection_type, duke_c);
        put_text(partial, ProfileField::DukeDegree, self.duke_degree, duke_c);
        put_text(
            partial,
            ProfileField::TwitterHandle,
            self.twitter_handle
                .map(|h| h.trim().trim_start_matches('@').to_string()),
            c,
        );

        if let Some(year) = self.founded {
            partial.insert(ProfileField::Founded, FieldValue::Number(year as f64), c);
        }
        if let Some(year) = self.graduation_year {
            partial.insert(ProfileField::GraduationYear, FieldValue::Number(year as f64), duke_c);
        }
        if let Some(date) = non_blank(&self.last_funding_date).and_then(|d| parse_iso_date(d).ok()) {
            partial.insert(ProfileField::LastFundingDate, FieldValue::Date(date), c);
        }
        if let Some(amount) = self.total_funding_usd {
            partial.insert(ProfileField::TotalFundingUsd, FieldValue::Number(amount), c);
        }
        if let Some(size) = self.market_size_usd {
            partial.insert(ProfileField::MarketSizeUsd, FieldValue::Number(size), c);
        }
        let investors = clean_list(self.investors);
        if !investors.is_empty() {
            partial.insert(ProfileField::Investors, FieldValue::List(investors), c);
        }
        if let Some(flag) = self.duke_affiliated {
            partial.insert(ProfileField::DukeAffiliated, FieldValue::Bool(flag), duke_c);
        }
        if let Some(conf) = self.duke_affiliation_confidence {
            partial.insert(
                ProfileField::DukeAffiliationConfidence,
                FieldValue::Number(conf),
                duke_c,
            );
        }
        if partial.entity.kind() == EntityKind::Company {
            let people = clean_people(self.people);
            if !people.is_empty() {
                partial.insert(ProfileField::People, FieldValue::People(people), duke_c);
            }
        }
    }
}

impl SocialFacts {
    pub fn validate(&self) -> Result<(), String> {
        check_unit("confidence", Some(self.confidence))?;
        match self.actionability {
            Some(a) if !(0.0..=100.0).contains(&a) => {
                Err(format!("actionability must be within 0..100, got {a}"))
            }
            _ => Ok(()),
        }
    }

    pub fn fill(self, partial: &mut PartialProfile) {
        let c = self.confidence;
        put_text(partial, ProfileField::SocialSummary, self.summary, c);
        if let Some(a) = self.actionability {
            partial.insert(ProfileField::Actionability, FieldValue::Number(a), c);
        }
        let topics = clean_list(self.topics);
        if !topics.is_empty() {
            partial.insert(ProfileField::Topics, FieldValue::List(topics), c);
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn put_text(partial: &mut PartialProfile, field: ProfileField, value: Option<String>, confidence: f64) {
    if let Some(text) = non_blank(&value) {
        partial.insert(field, FieldValue::Text(text.to_string()), confidence);
    }
}

/// Drops unnamed entries and repeats; statuses were checked by `validate`.
fn clean_people(people: Vec<PersonFacts>) -> Vec<Person> {
    let mut out: Vec<Person> = Vec::new();
    for p in people {
        let name = p.name.trim();
        if name.is_empty() || out.iter().any(|o| o.name.eq_ignore_ascii_case(name)) {
            continue;
        }
        let Ok(duke_status) = p.duke_affiliation_status.parse() else {
            continue;
        };
        out.push(Person {
            name: name.to_string(),
            title: non_blank(&p.title).map(str::to_string),
            duke_status,
        });
    }
    out
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|o| o.eq_ignore_ascii_case(item)) {
            out.push(item.to_string());
        }
    }
    out
}
