//! Field-level merge of partial profiles over a stored profile.
//!
//! Every field is resolved independently:
//! 1. higher trust rank wins (extracted > previously stored > raw unverified);
//! 2. on equal rank the later observation wins, exact ties keep the earlier
//!    candidate (stored value first, then partials in input order);
//! 3. a field no partial mentions keeps its stored value.
//!
//! Stored values compete at `PreviouslyStored` rank but keep their original
//! tag, so re-merging a merged profile with nothing new is a no-op.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use dcp_common::{
    EntityKey, MergedProfile, PartialProfile, ProfileField, ResolvedField, SourceTag, TrustRank,
};

/// Competing strength of a candidate value.
type Precedence = (TrustRank, DateTime<Utc>);

pub fn merge(
    entity: &EntityKey,
    existing: Option<&MergedProfile>,
    partials: &[PartialProfile],
) -> MergedProfile {
    let existing = existing.filter(|p| &p.entity == entity);

    let mut fields: BTreeMap<ProfileField, (Precedence, ResolvedField)> = BTreeMap::new();
    let mut merged_at = existing.map(|p| p.merged_at);

    if let Some(stored) = existing {
        for (field, resolved) in &stored.fields {
            let precedence = (TrustRank::PreviouslyStored, resolved.tag.observed_at);
            fields.insert(*field, (precedence, resolved.clone()));
        }
    }

    for partial in partials.iter().filter(|p| &p.entity == entity) {
        merged_at = merged_at.max(Some(partial.produced_at));
        let tag: SourceTag = partial.tag();
        let precedence = (partial.rank, partial.produced_at);

        for (field, observation) in &partial.fields {
            let candidate = ResolvedField {
                value: observation.value.clone(),
                confidence: observation.confidence,
                tag: tag.clone(),
            };
            match fields.entry(*field) {
                Entry::Vacant(slot) => {
                    slot.insert((precedence, candidate));
                }
                Entry::Occupied(mut slot) => {
                    if precedence > slot.get().0 {
                        slot.insert((precedence, candidate));
                    }
                }
            }
        }
    }

    MergedProfile {
        entity: entity.clone(),
        fields: fields
            .into_iter()
            .map(|(field, (_, resolved))| (field, resolved))
            .collect(),
        merged_at: merged_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use dcp_common::{FieldValue, SourceId};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap()
    }

    fn acme() -> EntityKey {
        EntityKey::company("Acme Inc")
    }

    fn partial(rank: TrustRank, source: SourceId, time: DateTime<Utc>) -> PartialProfile {
        PartialProfile::new(acme(), source, rank, time)
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn extracted_beats_stored() {
        let stored = merge(
            &acme(),
            None,
            &[partial(TrustRank::Extracted, SourceId::WebSearch, at(1))
                .with_field(ProfileField::Industry, text("saas"), 0.9)],
        );
        let fresh = partial(TrustRank::Extracted, SourceId::WebSearch, at(5))
            .with_field(ProfileField::Industry, text("fintech"), 0.8);

        let merged = merge(&acme(), Some(&stored), &[fresh]);
        assert_eq!(merged.get(ProfileField::Industry), Some(&text("fintech")));
        assert_eq!(merged.fields[&ProfileField::Industry].tag.observed_at, at(5));
    }

    #[test]
    fn stored_beats_raw_unverified_even_when_newer() {
        let stored = merge(
            &acme(),
            None,
            &[partial(TrustRank::Extracted, SourceId::WebSearch, at(1))
                .with_field(ProfileField::TwitterHandle, text("acme"), 0.9)],
        );
        let raw = partial(TrustRank::RawUnverified, SourceId::Social, at(9))
            .with_field(ProfileField::TwitterHandle, text("acme_fake"), 0.6);

        let merged = merge(&acme(), Some(&stored), &[raw]);
        assert_eq!(merged.get(ProfileField::TwitterHandle), Some(&text("acme")));
    }

    #[test]
    fn equal_rank_later_observation_wins_regardless_of_order() {
        let older = partial(TrustRank::Extracted, SourceId::WebSearch, at(2))
            .with_field(ProfileField::FundingStage, text("seed"), 0.9);
        let newer = partial(TrustRank::Extracted, SourceId::Social, at(3))
            .with_field(ProfileField::FundingStage, text("series a"), 0.7);

        let a = merge(&acme(), None, &[older.clone(), newer.clone()]);
        let b = merge(&acme(), None, &[newer, older]);
        assert_eq!(a.get(ProfileField::FundingStage), Some(&text("series a")));
        assert_eq!(a, b);
    }

    #[test]
    fn exact_ties_keep_the_first_candidate() {
        let first = partial(TrustRank::Extracted, SourceId::WebSearch, at(2))
            .with_field(ProfileField::Location, text("Durham, NC"), 0.9);
        let second = partial(TrustRank::Extracted, SourceId::Social, at(2))
            .with_field(ProfileField::Location, text("Raleigh, NC"), 0.9);

        let merged = merge(&acme(), None, &[first, second]);
        assert_eq!(merged.get(ProfileField::Location), Some(&text("Durham, NC")));
    }

    #[test]
    fn absent_fields_keep_stored_values() {
        let stored = merge(
            &acme(),
            None,
            &[partial(TrustRank::Extracted, SourceId::WebSearch, at(1))
                .with_field(ProfileField::Industry, text("saas"), 0.9)
                .with_field(ProfileField::Location, text("Durham, NC"), 0.9)],
        );
        let update = partial(TrustRank::Extracted, SourceId::WebSearch, at(4))
            .with_field(ProfileField::Industry, text("ai"), 0.9);

        let merged = merge(&acme(), Some(&stored), &[update]);
        assert_eq!(merged.get(ProfileField::Location), Some(&text("Durham, NC")));
        assert_eq!(merged.get(ProfileField::Industry), Some(&text("ai")));
        assert_eq!(merged.merged_at, at(4));
    }

    #[test]
    fn merging_nothing_new_is_a_no_op() {
        let once = merge(
            &acme(),
            None,
            &[
                partial(TrustRank::Extracted, SourceId::WebSearch, at(1))
                    .with_field(ProfileField::Industry, text("saas"), 0.9),
                partial(TrustRank::RawUnverified, SourceId::Social, at(2))
                    .with_field(ProfileField::TwitterHandle, text("acme"), 0.6),
            ],
        );
        assert_eq!(merge(&acme(), Some(&once), &[]), once);
    }

    #[test]
    fn partials_for_other_entities_are_ignored() {
        let other = PartialProfile::new(
            EntityKey::company("Globex"),
            SourceId::WebSearch,
            TrustRank::Extracted,
            at(3),
        )
        .with_field(ProfileField::Industry, text("energy"), 0.9);

        let merged = merge(&acme(), None, &[other]);
        assert!(merged.fields.is_empty());
        assert_eq!(merged.merged_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn stored_value_newer_than_extracted_still_loses() {
        let stored = merge(
            &acme(),
            None,
            &[partial(TrustRank::Extracted, SourceId::WebSearch, at(10))
                .with_field(ProfileField::Industry, text("saas"), 0.9)],
        );
        // Clock skew: the new extraction is stamped earlier than the stored value.
        let fresh = partial(TrustRank::Extracted, SourceId::WebSearch, at(10) - Duration::hours(3))
            .with_field(ProfileField::Industry, text("fintech"), 0.9);

        let merged = merge(&acme(), Some(&stored), &[fresh]);
        assert_eq!(merged.get(ProfileField::Industry), Some(&text("fintech")));
        assert_eq!(merged.merged_at, at(10));
    }
}
