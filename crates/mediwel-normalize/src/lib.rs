//! # mediwel-normalize
//!
//! Turns raw, locale-specific profile attributes into `CanonicalProfile`
//! slots the rule engine can evaluate.  Normalization is total: any input
//! produces a profile, with unrecognized values landing in `Slot::Unknown`
//! rather than erroring.  Ambiguity is data here, not a failure.

pub mod fields;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::debug;

use mediwel_contracts::profile::{CanonicalProfile, FieldKey, RawProfile};

/// Stateless per-profile normalizer.
///
/// The reference date is injected so age derivation stays deterministic;
/// callers pass today's date once at construction.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    today: NaiveDate,
}

impl Normalizer {
    pub fn new(today: NaiveDate) -> Self {
        Self { today }
    }

    /// Normalize every raw attribute independently.
    ///
    /// Returns the canonical profile plus the set of fields that were
    /// present in the raw record but could not be canonicalized.  Absent
    /// raw fields become `Unknown` without entering that set.
    pub fn normalize(&self, raw: &RawProfile) -> (CanonicalProfile, BTreeSet<FieldKey>) {
        let profile = CanonicalProfile {
            age: raw
                .birth_date
                .as_deref()
                .map(|s| fields::derive_age(s, self.today))
                .unwrap_or_default(),
            sex: raw.sex.as_deref().map(fields::normalize_sex).unwrap_or_default(),
            insurance: raw
                .insurance
                .as_deref()
                .map(fields::normalize_insurance)
                .unwrap_or_default(),
            benefit_tier: raw
                .benefit_tier
                .as_deref()
                .map(fields::normalize_benefit_tier)
                .unwrap_or_default(),
            disability_grade: raw
                .disability_grade
                .as_deref()
                .map(fields::normalize_disability)
                .unwrap_or_default(),
            ltci_grade: raw
                .ltci_grade
                .as_deref()
                .map(fields::normalize_ltci)
                .unwrap_or_default(),
            pregnant: raw
                .pregnancy
                .as_deref()
                .map(fields::normalize_pregnancy)
                .unwrap_or_default(),
            income_ratio: raw
                .income_ratio
                .as_deref()
                .map(fields::normalize_income_ratio)
                .unwrap_or_default(),
            region: raw
                .region
                .as_deref()
                .map(fields::normalize_region)
                .unwrap_or_default(),
        };

        let mut unrecognized = BTreeSet::new();
        let provided = [
            (FieldKey::Age, raw.birth_date.as_deref()),
            (FieldKey::Sex, raw.sex.as_deref()),
            (FieldKey::Insurance, raw.insurance.as_deref()),
            (FieldKey::BenefitTier, raw.benefit_tier.as_deref()),
            (FieldKey::DisabilityGrade, raw.disability_grade.as_deref()),
            (FieldKey::LtciGrade, raw.ltci_grade.as_deref()),
            (FieldKey::Pregnancy, raw.pregnancy.as_deref()),
            (FieldKey::IncomeRatio, raw.income_ratio.as_deref()),
            (FieldKey::Region, raw.region.as_deref()),
        ];
        let unknown = profile.unknown_fields();
        for (key, value) in provided {
            let was_provided = value.is_some_and(|s| !s.trim().is_empty());
            if was_provided && unknown.contains(&key) {
                unrecognized.insert(key);
            }
        }

        debug!(
            unknown = unknown.len(),
            unrecognized = unrecognized.len(),
            "profile normalized"
        );

        (profile, unrecognized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediwel_contracts::profile::{BenefitTier, Sex, Slot};

    fn normalizer() -> Normalizer {
        Normalizer::new(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap())
    }

    #[test]
    fn empty_raw_profile_is_all_unknown_with_nothing_unrecognized() {
        let (profile, unrecognized) = normalizer().normalize(&RawProfile::default());
        assert_eq!(profile, CanonicalProfile::default());
        assert!(unrecognized.is_empty());
    }

    #[test]
    fn garbage_in_every_field_still_produces_a_profile() {
        let raw = RawProfile {
            birth_date: Some("눈이 내리는 날".into()),
            sex: Some("?!".into()),
            insurance: Some("platinum plus".into()),
            benefit_tier: Some("gold".into()),
            disability_grade: Some("매우 심함".into()),
            ltci_grade: Some("대기중".into()),
            pregnancy: Some("maybe".into()),
            income_ratio: Some("a lot".into()),
            region: Some("   ".into()),
        };

        let (profile, unrecognized) = normalizer().normalize(&raw);
        assert_eq!(profile, CanonicalProfile::default());
        // Everything except the blank region string was provided-but-garbage.
        assert_eq!(unrecognized.len(), 8);
        assert!(!unrecognized.contains(&FieldKey::Region));
    }

    #[test]
    fn mixed_profile_normalizes_field_by_field() {
        let raw = RawProfile {
            birth_date: Some("1958-04-02".into()),
            sex: Some("여성".into()),
            insurance: None,
            benefit_tier: Some("미수급".into()),
            disability_grade: Some("없음".into()),
            ltci_grade: None,
            pregnancy: None,
            income_ratio: Some("85%".into()),
            region: Some("강남구".into()),
        };

        let (profile, unrecognized) = normalizer().normalize(&raw);
        assert!(unrecognized.is_empty());
        assert_eq!(profile.age, Slot::Known(67));
        assert_eq!(profile.sex, Slot::Known(Sex::Female));
        assert_eq!(profile.insurance, Slot::Unknown);
        assert_eq!(profile.benefit_tier, Slot::Known(BenefitTier::None));
        assert_eq!(profile.disability_grade, Slot::NotApplicable);
        assert_eq!(profile.ltci_grade, Slot::Unknown);
        assert_eq!(profile.pregnant, Slot::Unknown);
        assert_eq!(profile.income_ratio, Slot::Known(0.85));
        assert_eq!(profile.region, Slot::Known("강남구".to_string()));

        let unknown = profile.unknown_fields();
        assert!(unknown.contains(&FieldKey::Insurance));
        assert!(unknown.contains(&FieldKey::LtciGrade));
        assert!(unknown.contains(&FieldKey::Pregnancy));
        assert!(!unknown.contains(&FieldKey::DisabilityGrade));
        assert!(!unknown.contains(&FieldKey::BenefitTier));
    }

    #[test]
    fn unrecognized_tracks_only_failed_fields() {
        let raw = RawProfile {
            disability_grade: Some("9급".into()),
            sex: Some("남".into()),
            ..RawProfile::default()
        };

        let (profile, unrecognized) = normalizer().normalize(&raw);
        assert_eq!(profile.disability_grade, Slot::Unknown);
        assert_eq!(
            unrecognized.into_iter().collect::<Vec<_>>(),
            vec![FieldKey::DisabilityGrade]
        );
        assert!(profile.disability_grade.known().is_none());
    }
}
