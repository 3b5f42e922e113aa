//! Policy and eligibility-predicate types.
//!
//! A `Policy` couples free text (used for embedding and answer context) with
//! a structured `Predicate` — a conjunction/disjunction tree over canonical
//! attribute comparisons.  Policies are immutable once loaded; the catalog
//! is read-only at conversation time.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::profile::{BenefitTier, DisabilityGrade, FieldKey, InsuranceType, LtciGrade, Sex};

/// Stable policy identifier, unique within a catalog.
///
/// Ordering is lexicographic and is used as the deterministic tie-break in
/// retrieval ranking.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub String);

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Comparison operator for a predicate leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CmpOp {
    /// Exact equality against a single value.
    Eq,
    /// Numeric lower bound (inclusive).
    AtLeast,
    /// Numeric upper bound (inclusive).
    AtMost,
    /// Membership in a value set.
    In,
}

/// The right-hand side of a leaf comparison, as authored in the catalog.
///
/// Type compatibility with the referenced field is checked by
/// `Predicate::validate` at catalog load, so the evaluator can match
/// exhaustively without re-validating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CriterionValue {
    Flag(bool),
    Number(f64),
    Text(String),
    Numbers(Vec<f64>),
    Texts(Vec<String>),
}

/// One leaf comparison of a policy predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub field: FieldKey,
    pub op: CmpOp,
    pub value: CriterionValue,
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            CmpOp::Eq => "=",
            CmpOp::AtLeast => ">=",
            CmpOp::AtMost => "<=",
            CmpOp::In => "in",
        };
        let value = match &self.value {
            CriterionValue::Flag(b) => b.to_string(),
            CriterionValue::Number(n) => format_number(*n),
            CriterionValue::Text(s) => s.clone(),
            CriterionValue::Numbers(ns) => {
                let items: Vec<String> = ns.iter().map(|n| format_number(*n)).collect();
                format!("{{{}}}", items.join(", "))
            }
            CriterionValue::Texts(ts) => format!("{{{}}}", ts.join(", ")),
        };
        write!(f, "{} {} {}", self.field, op, value)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A structured eligibility predicate.
///
/// Authored in TOML as nested tables:
///
/// ```toml
/// [policy.predicate]
/// all = [
///     { field = "income_ratio", op = "at-most", value = 0.5 },
///     { any = [{ field = "disability_grade", op = "in", value = [1, 2, 3] }, { field = "pregnancy", op = "eq", value = true }] },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Predicate {
    All { all: Vec<Predicate> },
    Any { any: Vec<Predicate> },
    Leaf(Criterion),
}

impl Predicate {
    /// A leaf predicate, for programmatic construction.
    pub fn leaf(field: FieldKey, op: CmpOp, value: CriterionValue) -> Self {
        Predicate::Leaf(Criterion { field, op, value })
    }

    /// Every field referenced by at least one leaf of this predicate.
    pub fn referenced_fields(&self) -> Vec<FieldKey> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut Vec<FieldKey>) {
        match self {
            Predicate::Leaf(c) => {
                if !out.contains(&c.field) {
                    out.push(c.field);
                }
            }
            Predicate::All { all } => all.iter().for_each(|p| p.collect_fields(out)),
            Predicate::Any { any } => any.iter().for_each(|p| p.collect_fields(out)),
        }
    }

    /// Check that every leaf references only operators and values the
    /// normalizer can produce for its field.
    ///
    /// Called once at catalog load; a policy that fails validation never
    /// enters the catalog.  Returns `EngineError::ConfigError` naming the
    /// offending criterion.
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Predicate::All { all } => all.iter().try_for_each(Predicate::validate),
            Predicate::Any { any } => any.iter().try_for_each(Predicate::validate),
            Predicate::Leaf(c) => validate_criterion(c),
        }
    }
}

fn invalid(c: &Criterion, why: &str) -> EngineError {
    EngineError::ConfigError {
        reason: format!("invalid criterion '{c}': {why}"),
    }
}

fn validate_criterion(c: &Criterion) -> EngineResult<()> {
    use CriterionValue as V;

    match c.field {
        FieldKey::Age => match (c.op, &c.value) {
            (CmpOp::Eq | CmpOp::AtLeast | CmpOp::AtMost, V::Number(n))
                if (0.0..=130.0).contains(n) && n.fract() == 0.0 =>
            {
                Ok(())
            }
            (CmpOp::In, V::Numbers(ns))
                if !ns.is_empty()
                    && ns.iter().all(|n| (0.0..=130.0).contains(n) && n.fract() == 0.0) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "age expects whole-number years in 0..=130")),
        },

        FieldKey::IncomeRatio => match (c.op, &c.value) {
            (CmpOp::AtLeast | CmpOp::AtMost, V::Number(n))
                if n.is_finite() && (0.0..=10.0).contains(n) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "income_ratio expects at-least/at-most with a ratio in 0..=10")),
        },

        FieldKey::Sex => match (c.op, &c.value) {
            (CmpOp::Eq, V::Text(s)) if parse_sex(s).is_some() => Ok(()),
            _ => Err(invalid(c, "sex expects eq with 'male' or 'female'")),
        },

        FieldKey::Insurance => match (c.op, &c.value) {
            (CmpOp::Eq, V::Text(s)) if parse_insurance(s).is_some() => Ok(()),
            (CmpOp::In, V::Texts(ts))
                if !ts.is_empty() && ts.iter().all(|s| parse_insurance(s).is_some()) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "insurance expects canonical insurance_type values")),
        },

        FieldKey::BenefitTier => match (c.op, &c.value) {
            (CmpOp::Eq, V::Text(s)) if parse_benefit_tier(s).is_some() => Ok(()),
            (CmpOp::In, V::Texts(ts))
                if !ts.is_empty() && ts.iter().all(|s| parse_benefit_tier(s).is_some()) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "benefit_tier expects canonical benefit tier values")),
        },

        FieldKey::DisabilityGrade => match (c.op, &c.value) {
            (CmpOp::Eq | CmpOp::AtLeast | CmpOp::AtMost, V::Number(n))
                if is_valid_grade(*n) =>
            {
                Ok(())
            }
            (CmpOp::In, V::Numbers(ns))
                if !ns.is_empty() && ns.iter().all(|n| is_valid_grade(*n)) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "disability_grade expects whole grades in 1..=6")),
        },

        FieldKey::LtciGrade => match (c.op, &c.value) {
            (CmpOp::Eq, V::Text(s)) if parse_ltci(s).is_some() => Ok(()),
            (CmpOp::In, V::Texts(ts))
                if !ts.is_empty() && ts.iter().all(|s| parse_ltci(s).is_some()) =>
            {
                Ok(())
            }
            _ => Err(invalid(c, "ltci_grade expects g1..g5 or cognitive")),
        },

        FieldKey::Pregnancy => match (c.op, &c.value) {
            (CmpOp::Eq, V::Flag(_)) => Ok(()),
            _ => Err(invalid(c, "pregnancy expects eq with a boolean")),
        },

        FieldKey::Region => match (c.op, &c.value) {
            (CmpOp::Eq, V::Text(s)) if !s.trim().is_empty() => Ok(()),
            _ => Err(invalid(c, "region expects eq with a non-empty district")),
        },
    }
}

fn is_valid_grade(n: f64) -> bool {
    n.fract() == 0.0
        && (f64::from(DisabilityGrade::MIN)..=f64::from(DisabilityGrade::MAX)).contains(&n)
}

/// Parse a canonical sex token as authored in catalog predicates.
pub fn parse_sex(s: &str) -> Option<Sex> {
    match s {
        "male" => Some(Sex::Male),
        "female" => Some(Sex::Female),
        _ => None,
    }
}

/// Parse a canonical insurance token as authored in catalog predicates.
pub fn parse_insurance(s: &str) -> Option<InsuranceType> {
    match s {
        "employed" => Some(InsuranceType::Employed),
        "local" => Some(InsuranceType::Local),
        "dependent" => Some(InsuranceType::Dependent),
        "medical_aid_1" => Some(InsuranceType::MedicalAid1),
        "medical_aid_2" => Some(InsuranceType::MedicalAid2),
        _ => None,
    }
}

/// Parse a canonical benefit-tier token as authored in catalog predicates.
pub fn parse_benefit_tier(s: &str) -> Option<BenefitTier> {
    match s {
        "none" => Some(BenefitTier::None),
        "livelihood" => Some(BenefitTier::Livelihood),
        "medical" => Some(BenefitTier::Medical),
        "housing" => Some(BenefitTier::Housing),
        "education" => Some(BenefitTier::Education),
        _ => None,
    }
}

/// Parse a canonical LTCI-grade token as authored in catalog predicates.
pub fn parse_ltci(s: &str) -> Option<LtciGrade> {
    match s {
        "g1" => Some(LtciGrade::G1),
        "g2" => Some(LtciGrade::G2),
        "g3" => Some(LtciGrade::G3),
        "g4" => Some(LtciGrade::G4),
        "g5" => Some(LtciGrade::G5),
        "cognitive" => Some(LtciGrade::Cognitive),
        _ => None,
    }
}

/// One medical-welfare policy, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    /// Short human-readable title, shown in answers.
    pub title: String,
    /// Free-text description; the embedding is computed over title + description.
    pub description: String,
    /// What the policy provides, carried into answer context when present.
    pub benefits: Option<String>,
    /// Residency district this policy is limited to, if any.  A `Known`
    /// profile region that differs excludes the policy before rule
    /// evaluation.
    pub region: Option<String>,
    /// Structured eligibility predicate over canonical attributes.
    pub predicate: Predicate,
    /// Precomputed, L2-normalized embedding of the policy text.  Catalogs
    /// may omit it; the index embeds title + description at build time.
    #[serde(default)]
    pub embedding: Vec<f32>,
}
