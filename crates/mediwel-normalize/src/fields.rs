//! Per-field normalization functions.
//!
//! Every function here is total and pure: any string maps to a `Slot`, with
//! unrecognized input becoming `Slot::Unknown`.  None of them panic.
//! Token tables cover both Korean and English spellings because the profile
//! store hands us whatever the intake form collected.

use chrono::{Datelike, NaiveDate};
use mediwel_contracts::profile::{
    BenefitTier, DisabilityGrade, InsuranceType, LtciGrade, Sex, Slot,
};

const MAX_AGE: i32 = 130;

/// Phrases that affirmatively state "I do not hold this status".
fn is_none_phrase(s: &str) -> bool {
    matches!(s, "없음" | "무" | "해당없음" | "해당 없음" | "none" | "no" | "0")
}

pub fn normalize_sex(raw: &str) -> Slot<Sex> {
    let s = raw.trim().to_lowercase();
    match s.as_str() {
        "남" | "남성" | "남자" | "m" | "male" => Slot::Known(Sex::Male),
        "여" | "여성" | "여자" | "f" | "female" => Slot::Known(Sex::Female),
        _ => Slot::Unknown,
    }
}

/// Income relative to the median, as a ratio (1.0 = 100% of median).
///
/// Accepts both percent ("120%", bare 120) and ratio (1.2) spellings;
/// a bare number above 10 is read as a percentage.  Out-of-range results
/// are unrecognized, never clamped.
pub fn normalize_income_ratio(raw: &str) -> Slot<f64> {
    let s = raw.trim();
    let had_percent = s.ends_with('%');
    let s: String = s
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();

    let value: f64 = match s.parse() {
        Ok(v) => v,
        Err(_) => return Slot::Unknown,
    };
    if !value.is_finite() {
        return Slot::Unknown;
    }

    let ratio = if had_percent || value > 10.0 {
        value / 100.0
    } else {
        value
    };

    if (0.0..=10.0).contains(&ratio) {
        Slot::Known(ratio)
    } else {
        Slot::Unknown
    }
}

/// Registered disability grade: "3", "3급", "grade 3", or a none-phrase.
pub fn normalize_disability(raw: &str) -> Slot<DisabilityGrade> {
    let s = raw.trim().to_lowercase();
    if is_none_phrase(&s) {
        return Slot::NotApplicable;
    }

    let digits = s
        .trim_start_matches("grade")
        .trim_end_matches('급')
        .trim();
    match digits.parse::<u8>().ok().and_then(DisabilityGrade::new) {
        Some(grade) => Slot::Known(grade),
        None => Slot::Unknown,
    }
}

/// Long-term care insurance grade: "2", "2등급", "g2", or the cognitive
/// support grade ("인지지원", "cognitive").
pub fn normalize_ltci(raw: &str) -> Slot<LtciGrade> {
    let s = raw.trim().to_lowercase();
    if is_none_phrase(&s) {
        return Slot::NotApplicable;
    }
    if s.contains("인지지원") || s.contains("cognitive") {
        return Slot::Known(LtciGrade::Cognitive);
    }

    let digits = s
        .trim_start_matches('g')
        .trim_end_matches("등급")
        .trim();
    match digits.parse::<u8>() {
        Ok(1) => Slot::Known(LtciGrade::G1),
        Ok(2) => Slot::Known(LtciGrade::G2),
        Ok(3) => Slot::Known(LtciGrade::G3),
        Ok(4) => Slot::Known(LtciGrade::G4),
        Ok(5) => Slot::Known(LtciGrade::G5),
        _ => Slot::Unknown,
    }
}

/// National health insurance qualification, by keyword.
///
/// Medical aid is checked before the workplace/local split because intake
/// text like "의료급여 1종" would otherwise never match.
pub fn normalize_insurance(raw: &str) -> Slot<InsuranceType> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return Slot::Unknown;
    }

    if s.contains("의료급여") || s.contains("medical aid") || s.contains("medical_aid") {
        if s.contains("2종") || s.contains('2') {
            return Slot::Known(InsuranceType::MedicalAid2);
        }
        return Slot::Known(InsuranceType::MedicalAid1);
    }
    if s == "1종" {
        return Slot::Known(InsuranceType::MedicalAid1);
    }
    if s == "2종" {
        return Slot::Known(InsuranceType::MedicalAid2);
    }

    if s.contains("피부양") || s.contains("dependent") {
        return Slot::Known(InsuranceType::Dependent);
    }
    if s.contains("직장") || s.contains("workplace") || s.contains("employ") {
        return Slot::Known(InsuranceType::Employed);
    }
    if s.contains("지역") || s.contains("local") || s.contains("regional") {
        return Slot::Known(InsuranceType::Local);
    }

    Slot::Unknown
}

/// Basic livelihood security benefit tier, by keyword.
///
/// A none-phrase is the affirmative `BenefitTier::None` value, not an
/// unknown: "not a benefit recipient" is eligibility-relevant information.
pub fn normalize_benefit_tier(raw: &str) -> Slot<BenefitTier> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return Slot::Unknown;
    }
    if is_none_phrase(&s) || s.contains("미수급") || s.contains("비수급") {
        return Slot::Known(BenefitTier::None);
    }

    if s.contains("생계") || s.contains("livelihood") {
        return Slot::Known(BenefitTier::Livelihood);
    }
    if s.contains("의료") || s.contains("medical") {
        return Slot::Known(BenefitTier::Medical);
    }
    if s.contains("주거") || s.contains("housing") {
        return Slot::Known(BenefitTier::Housing);
    }
    if s.contains("교육") || s.contains("education") {
        return Slot::Known(BenefitTier::Education);
    }

    Slot::Unknown
}

pub fn normalize_pregnancy(raw: &str) -> Slot<bool> {
    let s = raw.trim().to_lowercase();
    match s.as_str() {
        "임신" | "임신중" | "임신 중" | "pregnant" | "yes" | "y" | "true" | "예" | "네"
        | "o" => Slot::Known(true),
        "아니오" | "아니요" | "아님" | "비임신" | "없음" | "no" | "n" | "false" | "x" => {
            Slot::Known(false)
        }
        _ => Slot::Unknown,
    }
}

pub fn normalize_region(raw: &str) -> Slot<String> {
    let s = raw.trim();
    if s.is_empty() {
        Slot::Unknown
    } else {
        Slot::Known(s.to_string())
    }
}

/// Age in whole years from a raw birth date, against a reference date.
///
/// Accepts `YYYY-MM-DD`, `YYYY.MM.DD`, or a bare year.  Future dates and
/// implausible ages are unrecognized.
pub fn derive_age(raw: &str, today: NaiveDate) -> Slot<u8> {
    let s = raw.trim();

    if let Some(birth) = parse_birth_date(s) {
        if birth > today {
            return Slot::Unknown;
        }
        let mut age = today.year() - birth.year();
        if (today.month(), today.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        return age_slot(age);
    }

    // Bare year: age approximated as calendar-year difference.
    if s.len() == 4 {
        if let Ok(year) = s.parse::<i32>() {
            return age_slot(today.year() - year);
        }
    }

    Slot::Unknown
}

fn parse_birth_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y.%m.%d"))
        .ok()
}

fn age_slot(age: i32) -> Slot<u8> {
    if (0..=MAX_AGE).contains(&age) {
        Slot::Known(age as u8)
    } else {
        Slot::Unknown
    }
}
