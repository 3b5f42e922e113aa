//! Profile types: raw inbound attributes and their canonical forms.
//!
//! A `RawProfile` is whatever the profile store hands us — free text,
//! locale-specific encodings, or nothing at all.  The normalizer turns it
//! into a `CanonicalProfile` where every field is either a canonical
//! enumeration value, `NotApplicable`, or the explicit `Unknown` sentinel.
//! The rule engine only ever reads canonical profiles.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The state of one canonical profile field.
///
/// `NotApplicable` and `Unknown` are deliberately distinct: `NotApplicable`
/// means the person affirmatively does not hold the status (e.g. "no
/// registered disability"), while `Unknown` means the question was never
/// answered.  The rule engine treats `Unknown` as indeterminate and
/// `NotApplicable` as a real, comparable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot<T> {
    /// A canonical enumeration value.
    Known(T),
    /// The person affirmatively does not hold this status.
    NotApplicable,
    /// Never asked / could not be canonicalized.
    Unknown,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Slot::Unknown
    }
}

impl<T> Slot<T> {
    /// Return the contained value if this slot is `Known`.
    pub fn known(&self) -> Option<&T> {
        match self {
            Slot::Known(v) => Some(v),
            _ => None,
        }
    }

    /// True if this slot is the `Unknown` sentinel.
    pub fn is_unknown(&self) -> bool {
        matches!(self, Slot::Unknown)
    }
}

/// Biological sex as used by policy eligibility criteria.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Male => write!(f, "male"),
            Sex::Female => write!(f, "female"),
        }
    }
}

/// National health insurance qualification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsuranceType {
    /// Workplace subscriber.
    Employed,
    /// Regional (self-employed / local) subscriber.
    Local,
    /// Dependent of a workplace subscriber.
    Dependent,
    /// Medical aid, category 1.
    MedicalAid1,
    /// Medical aid, category 2.
    MedicalAid2,
}

impl fmt::Display for InsuranceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InsuranceType::Employed => "employed",
            InsuranceType::Local => "local",
            InsuranceType::Dependent => "dependent",
            InsuranceType::MedicalAid1 => "medical_aid_1",
            InsuranceType::MedicalAid2 => "medical_aid_2",
        };
        write!(f, "{s}")
    }
}

/// Public-assistance (basic livelihood security) benefit tier.
///
/// `None` is a canonical value, not an absence: it states the person is
/// affirmatively outside the basic benefit system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BenefitTier {
    None,
    Livelihood,
    Medical,
    Housing,
    Education,
}

impl fmt::Display for BenefitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BenefitTier::None => "none",
            BenefitTier::Livelihood => "livelihood",
            BenefitTier::Medical => "medical",
            BenefitTier::Housing => "housing",
            BenefitTier::Education => "education",
        };
        write!(f, "{s}")
    }
}

/// Registered disability grade, ordinal 1 (most severe) through 6.
///
/// Absence of a registered disability is expressed at the slot level as
/// `Slot::NotApplicable`, never as a grade value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisabilityGrade(u8);

impl DisabilityGrade {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 6;

    /// Construct a grade, returning `None` outside 1..=6.
    pub fn new(grade: u8) -> Option<Self> {
        (Self::MIN..=Self::MAX).contains(&grade).then_some(Self(grade))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for DisabilityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grade {}", self.0)
    }
}

/// Long-term care insurance grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LtciGrade {
    G1,
    G2,
    G3,
    G4,
    G5,
    /// Cognitive-support (dementia) grade.
    Cognitive,
}

impl fmt::Display for LtciGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LtciGrade::G1 => "g1",
            LtciGrade::G2 => "g2",
            LtciGrade::G3 => "g3",
            LtciGrade::G4 => "g4",
            LtciGrade::G5 => "g5",
            LtciGrade::Cognitive => "cognitive",
        };
        write!(f, "{s}")
    }
}

/// The canonical eligibility dimensions a policy predicate may reference.
///
/// `Age` is derived from the raw birth date at normalization time so the
/// rule engine never needs a clock.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Age,
    Sex,
    Insurance,
    BenefitTier,
    DisabilityGrade,
    LtciGrade,
    Pregnancy,
    IncomeRatio,
    Region,
}

impl FieldKey {
    /// All canonical dimensions, in stable order.
    pub const ALL: [FieldKey; 9] = [
        FieldKey::Age,
        FieldKey::Sex,
        FieldKey::Insurance,
        FieldKey::BenefitTier,
        FieldKey::DisabilityGrade,
        FieldKey::LtciGrade,
        FieldKey::Pregnancy,
        FieldKey::IncomeRatio,
        FieldKey::Region,
    ];
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKey::Age => "age",
            FieldKey::Sex => "sex",
            FieldKey::Insurance => "insurance",
            FieldKey::BenefitTier => "benefit_tier",
            FieldKey::DisabilityGrade => "disability_grade",
            FieldKey::LtciGrade => "ltci_grade",
            FieldKey::Pregnancy => "pregnancy",
            FieldKey::IncomeRatio => "income_ratio",
            FieldKey::Region => "region",
        };
        write!(f, "{s}")
    }
}

/// Raw profile attributes as delivered by the profile store.
///
/// Every field is optional free text.  The core never writes these back;
/// normalization produces a fresh `CanonicalProfile` instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProfile {
    pub birth_date: Option<String>,
    pub sex: Option<String>,
    pub insurance: Option<String>,
    pub benefit_tier: Option<String>,
    pub disability_grade: Option<String>,
    pub ltci_grade: Option<String>,
    pub pregnancy: Option<String>,
    pub income_ratio: Option<String>,
    pub region: Option<String>,
}

/// A fully normalized profile.  Immutable once produced.
///
/// Invariant: every field is a canonical enumeration value, `NotApplicable`,
/// or `Unknown` — there is no partially-normalized state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalProfile {
    /// Age in whole years, derived from the raw birth date.
    pub age: Slot<u8>,
    pub sex: Slot<Sex>,
    pub insurance: Slot<InsuranceType>,
    pub benefit_tier: Slot<BenefitTier>,
    pub disability_grade: Slot<DisabilityGrade>,
    pub ltci_grade: Slot<LtciGrade>,
    pub pregnant: Slot<bool>,
    /// Income as a ratio of the median (1.0 = 100% of median income).
    pub income_ratio: Slot<f64>,
    /// Residency district code or name, trimmed.
    pub region: Slot<String>,
}

impl Default for CanonicalProfile {
    fn default() -> Self {
        Self {
            age: Slot::Unknown,
            sex: Slot::Unknown,
            insurance: Slot::Unknown,
            benefit_tier: Slot::Unknown,
            disability_grade: Slot::Unknown,
            ltci_grade: Slot::Unknown,
            pregnant: Slot::Unknown,
            income_ratio: Slot::Unknown,
            region: Slot::Unknown,
        }
    }
}

impl CanonicalProfile {
    /// All fields still carrying the `Unknown` sentinel, in stable order.
    pub fn unknown_fields(&self) -> BTreeSet<FieldKey> {
        let mut out = BTreeSet::new();
        if self.age.is_unknown() {
            out.insert(FieldKey::Age);
        }
        if self.sex.is_unknown() {
            out.insert(FieldKey::Sex);
        }
        if self.insurance.is_unknown() {
            out.insert(FieldKey::Insurance);
        }
        if self.benefit_tier.is_unknown() {
            out.insert(FieldKey::BenefitTier);
        }
        if self.disability_grade.is_unknown() {
            out.insert(FieldKey::DisabilityGrade);
        }
        if self.ltci_grade.is_unknown() {
            out.insert(FieldKey::LtciGrade);
        }
        if self.pregnant.is_unknown() {
            out.insert(FieldKey::Pregnancy);
        }
        if self.income_ratio.is_unknown() {
            out.insert(FieldKey::IncomeRatio);
        }
        if self.region.is_unknown() {
            out.insert(FieldKey::Region);
        }
        out
    }
}
