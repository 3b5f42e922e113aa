//! Predicate evaluation.
//!
//! Evaluation is three-valued: a leaf over an `Unknown` slot is
//! `Indeterminate`, not a failure.  `NotApplicable` is a real value and
//! fails set and threshold tests outright.  Every child of a node is
//! evaluated even when a sibling already decides the verdict, so the
//! explanation list shown to the user is always complete.

use std::collections::BTreeSet;

use tracing::trace;

use mediwel_contracts::policy::{CmpOp, Criterion, CriterionValue, Predicate};
use mediwel_contracts::profile::{CanonicalProfile, FieldKey, Slot};
use mediwel_contracts::retrieval::{CriterionOutcome, Verdict};

/// The outcome of evaluating a whole predicate against a profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// Per-leaf outcomes in predicate order, complete for every leaf.
    pub criteria: Vec<CriterionOutcome>,
}

/// Evaluate a predicate against a canonical profile.
///
/// Deterministic: identical inputs always yield an identical verdict and
/// explanation list.
pub fn evaluate(predicate: &Predicate, profile: &CanonicalProfile) -> Evaluation {
    let mut criteria = Vec::new();
    let verdict = eval_node(predicate, profile, &mut criteria);
    trace!(%verdict, leaves = criteria.len(), "predicate evaluated");
    Evaluation { verdict, criteria }
}

/// Unknown profile fields that actually gate this predicate's verdict.
///
/// Empty unless the overall verdict is `Indeterminate`.  Inside a
/// disjunction, children are only inspected when no sibling already
/// matched: once one branch matches, the others cannot change the outcome
/// and their unknowns are not worth asking about.
pub fn undetermined_fields(
    predicate: &Predicate,
    profile: &CanonicalProfile,
) -> BTreeSet<FieldKey> {
    let (verdict, fields) = gate_node(predicate, profile);
    if verdict == Verdict::Indeterminate {
        fields
    } else {
        BTreeSet::new()
    }
}

fn eval_node(
    predicate: &Predicate,
    profile: &CanonicalProfile,
    out: &mut Vec<CriterionOutcome>,
) -> Verdict {
    match predicate {
        Predicate::Leaf(criterion) => {
            let outcome = eval_leaf(criterion, profile);
            let verdict = outcome.verdict;
            out.push(outcome);
            verdict
        }
        Predicate::All { all } => {
            let verdicts: Vec<Verdict> =
                all.iter().map(|p| eval_node(p, profile, out)).collect();
            if verdicts.iter().any(|v| *v == Verdict::NoMatch) {
                Verdict::NoMatch
            } else if verdicts.iter().any(|v| *v == Verdict::Indeterminate) {
                Verdict::Indeterminate
            } else {
                Verdict::Match
            }
        }
        Predicate::Any { any } => {
            let verdicts: Vec<Verdict> =
                any.iter().map(|p| eval_node(p, profile, out)).collect();
            if verdicts.iter().any(|v| *v == Verdict::Match) {
                Verdict::Match
            } else if verdicts.iter().all(|v| *v == Verdict::NoMatch) {
                Verdict::NoMatch
            } else {
                Verdict::Indeterminate
            }
        }
    }
}

fn gate_node(predicate: &Predicate, profile: &CanonicalProfile) -> (Verdict, BTreeSet<FieldKey>) {
    match predicate {
        Predicate::Leaf(criterion) => {
            let verdict = eval_leaf(criterion, profile).verdict;
            let mut fields = BTreeSet::new();
            if verdict == Verdict::Indeterminate {
                fields.insert(criterion.field);
            }
            (verdict, fields)
        }
        Predicate::All { all } => {
            let children: Vec<_> = all.iter().map(|p| gate_node(p, profile)).collect();
            if children.iter().any(|(v, _)| *v == Verdict::NoMatch) {
                (Verdict::NoMatch, BTreeSet::new())
            } else if children.iter().any(|(v, _)| *v == Verdict::Indeterminate) {
                let fields = children
                    .into_iter()
                    .filter(|(v, _)| *v == Verdict::Indeterminate)
                    .flat_map(|(_, f)| f)
                    .collect();
                (Verdict::Indeterminate, fields)
            } else {
                (Verdict::Match, BTreeSet::new())
            }
        }
        Predicate::Any { any } => {
            let children: Vec<_> = any.iter().map(|p| gate_node(p, profile)).collect();
            if children.iter().any(|(v, _)| *v == Verdict::Match) {
                (Verdict::Match, BTreeSet::new())
            } else if children.iter().all(|(v, _)| *v == Verdict::NoMatch) {
                (Verdict::NoMatch, BTreeSet::new())
            } else {
                let fields = children
                    .into_iter()
                    .filter(|(v, _)| *v == Verdict::Indeterminate)
                    .flat_map(|(_, f)| f)
                    .collect();
                (Verdict::Indeterminate, fields)
            }
        }
    }
}

// ── Leaf evaluation ──────────────────────────────────────────────────────────

/// A profile slot flattened to something a criterion can compare against.
enum SlotView {
    Unknown,
    NotApplicable,
    Number(f64),
    Text(String),
    Flag(bool),
}

fn slot_view(field: FieldKey, profile: &CanonicalProfile) -> SlotView {
    fn view<T>(slot: &Slot<T>, f: impl FnOnce(&T) -> SlotView) -> SlotView {
        match slot {
            Slot::Known(v) => f(v),
            Slot::NotApplicable => SlotView::NotApplicable,
            Slot::Unknown => SlotView::Unknown,
        }
    }

    match field {
        FieldKey::Age => view(&profile.age, |a| SlotView::Number(f64::from(*a))),
        FieldKey::Sex => view(&profile.sex, |s| SlotView::Text(s.to_string())),
        FieldKey::Insurance => view(&profile.insurance, |i| SlotView::Text(i.to_string())),
        FieldKey::BenefitTier => view(&profile.benefit_tier, |b| SlotView::Text(b.to_string())),
        FieldKey::DisabilityGrade => view(&profile.disability_grade, |g| {
            SlotView::Number(f64::from(g.value()))
        }),
        FieldKey::LtciGrade => view(&profile.ltci_grade, |g| SlotView::Text(g.to_string())),
        FieldKey::Pregnancy => view(&profile.pregnant, |p| SlotView::Flag(*p)),
        FieldKey::IncomeRatio => view(&profile.income_ratio, |r| SlotView::Number(*r)),
        FieldKey::Region => view(&profile.region, |r| SlotView::Text(r.trim().to_string())),
    }
}

fn eval_leaf(criterion: &Criterion, profile: &CanonicalProfile) -> CriterionOutcome {
    let rendered = criterion.to_string();
    let (verdict, reason) = match slot_view(criterion.field, profile) {
        SlotView::Unknown => (
            Verdict::Indeterminate,
            format!("{} is not yet known", criterion.field),
        ),
        SlotView::NotApplicable => (
            Verdict::NoMatch,
            format!("{} does not apply to this profile", criterion.field),
        ),
        SlotView::Number(n) => describe(compare_number(n, criterion), criterion, n),
        SlotView::Text(t) => {
            let satisfied = compare_text(&t, criterion);
            describe(satisfied, criterion, &t)
        }
        SlotView::Flag(b) => describe(compare_flag(b, criterion), criterion, b),
    };

    CriterionOutcome {
        criterion: rendered,
        verdict,
        reason,
    }
}

fn describe(
    satisfied: Option<bool>,
    criterion: &Criterion,
    value: impl std::fmt::Display,
) -> (Verdict, String) {
    match satisfied {
        Some(true) => (
            Verdict::Match,
            format!("profile {} {} satisfies the criterion", criterion.field, value),
        ),
        Some(false) => (
            Verdict::NoMatch,
            format!("profile {} {} fails the criterion", criterion.field, value),
        ),
        // A value/operator combination catalog validation would have
        // rejected.  Treated as a hard non-match rather than a silent pass.
        None => (
            Verdict::NoMatch,
            format!("{} cannot be compared as written", criterion.field),
        ),
    }
}

fn compare_number(value: f64, criterion: &Criterion) -> Option<bool> {
    match (criterion.op, &criterion.value) {
        (CmpOp::Eq, CriterionValue::Number(n)) => Some(value == *n),
        (CmpOp::AtLeast, CriterionValue::Number(n)) => Some(value >= *n),
        (CmpOp::AtMost, CriterionValue::Number(n)) => Some(value <= *n),
        (CmpOp::In, CriterionValue::Numbers(ns)) => Some(ns.iter().any(|n| value == *n)),
        _ => None,
    }
}

fn compare_text(value: &str, criterion: &Criterion) -> Option<bool> {
    // Criterion text is canonical by catalog validation; region is the one
    // free-text field, compared trimmed.
    let normalize = |s: &str| match criterion.field {
        FieldKey::Region => s.trim().to_string(),
        _ => s.to_string(),
    };
    match (criterion.op, &criterion.value) {
        (CmpOp::Eq, CriterionValue::Text(t)) => Some(normalize(value) == normalize(t)),
        (CmpOp::In, CriterionValue::Texts(ts)) => {
            Some(ts.iter().any(|t| normalize(value) == normalize(t)))
        }
        _ => None,
    }
}

fn compare_flag(value: bool, criterion: &Criterion) -> Option<bool> {
    match (criterion.op, &criterion.value) {
        (CmpOp::Eq, CriterionValue::Flag(f)) => Some(value == *f),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mediwel_contracts::profile::{BenefitTier, DisabilityGrade, LtciGrade, Sex};

    fn income_and_grade_predicate() -> Predicate {
        Predicate::All {
            all: vec![
                Predicate::leaf(
                    FieldKey::IncomeRatio,
                    CmpOp::AtMost,
                    CriterionValue::Number(0.5),
                ),
                Predicate::leaf(
                    FieldKey::DisabilityGrade,
                    CmpOp::In,
                    CriterionValue::Numbers(vec![1.0, 2.0, 3.0]),
                ),
            ],
        }
    }

    fn profile_with_grade(grade: u8) -> CanonicalProfile {
        CanonicalProfile {
            disability_grade: Slot::Known(DisabilityGrade::new(grade).unwrap()),
            ..CanonicalProfile::default()
        }
    }

    // ── Kleene combinators ───────────────────────────────────────────────────

    #[test]
    fn conjunction_no_match_beats_indeterminate() {
        // income known and failing, grade unknown.
        let profile = CanonicalProfile {
            income_ratio: Slot::Known(0.8),
            ..CanonicalProfile::default()
        };
        let eval = evaluate(&income_and_grade_predicate(), &profile);
        assert_eq!(eval.verdict, Verdict::NoMatch);
        // Both leaves still explained.
        assert_eq!(eval.criteria.len(), 2);
        assert_eq!(eval.criteria[0].verdict, Verdict::NoMatch);
        assert_eq!(eval.criteria[1].verdict, Verdict::Indeterminate);
    }

    #[test]
    fn disjunction_match_beats_no_match() {
        let predicate = Predicate::Any {
            any: vec![
                Predicate::leaf(FieldKey::Pregnancy, CmpOp::Eq, CriterionValue::Flag(true)),
                Predicate::leaf(
                    FieldKey::Age,
                    CmpOp::AtLeast,
                    CriterionValue::Number(65.0),
                ),
            ],
        };
        let profile = CanonicalProfile {
            pregnant: Slot::Known(true),
            age: Slot::Known(30),
            ..CanonicalProfile::default()
        };
        let eval = evaluate(&predicate, &profile);
        assert_eq!(eval.verdict, Verdict::Match);
        assert_eq!(eval.criteria.len(), 2);
    }

    #[test]
    fn disjunction_of_no_match_and_unknown_is_indeterminate() {
        let predicate = Predicate::Any {
            any: vec![
                Predicate::leaf(FieldKey::Pregnancy, CmpOp::Eq, CriterionValue::Flag(true)),
                Predicate::leaf(
                    FieldKey::Age,
                    CmpOp::AtLeast,
                    CriterionValue::Number(65.0),
                ),
            ],
        };
        let profile = CanonicalProfile {
            pregnant: Slot::Known(false),
            ..CanonicalProfile::default()
        };
        assert_eq!(evaluate(&predicate, &profile).verdict, Verdict::Indeterminate);
    }

    // ── Concrete eligibility scenarios ───────────────────────────────────────

    #[test]
    fn unknown_income_with_qualifying_grade_is_indeterminate() {
        let profile = profile_with_grade(2);
        let eval = evaluate(&income_and_grade_predicate(), &profile);
        assert_eq!(eval.verdict, Verdict::Indeterminate);
        assert_eq!(eval.criteria[0].verdict, Verdict::Indeterminate);
        assert_eq!(eval.criteria[1].verdict, Verdict::Match);

        let fields = undetermined_fields(&income_and_grade_predicate(), &profile);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec![FieldKey::IncomeRatio]);
    }

    #[test]
    fn excessive_income_excludes_regardless_of_grade() {
        let mut profile = profile_with_grade(2);
        profile.income_ratio = Slot::Known(0.8);
        let eval = evaluate(&income_and_grade_predicate(), &profile);
        assert_eq!(eval.verdict, Verdict::NoMatch);
        assert!(undetermined_fields(&income_and_grade_predicate(), &profile).is_empty());
    }

    #[test]
    fn not_applicable_grade_fails_membership_test() {
        let predicate = Predicate::leaf(
            FieldKey::DisabilityGrade,
            CmpOp::In,
            CriterionValue::Numbers(vec![1.0, 2.0, 3.0]),
        );
        let profile = CanonicalProfile {
            disability_grade: Slot::NotApplicable,
            ..CanonicalProfile::default()
        };
        let eval = evaluate(&predicate, &profile);
        assert_eq!(eval.verdict, Verdict::NoMatch);
        assert!(eval.criteria[0].reason.contains("does not apply"));
    }

    #[test]
    fn benefit_tier_none_is_a_comparable_value() {
        let predicate = Predicate::leaf(
            FieldKey::BenefitTier,
            CmpOp::In,
            CriterionValue::Texts(vec!["livelihood".into(), "medical".into()]),
        );
        let profile = CanonicalProfile {
            benefit_tier: Slot::Known(BenefitTier::None),
            ..CanonicalProfile::default()
        };
        assert_eq!(evaluate(&predicate, &profile).verdict, Verdict::NoMatch);
    }

    #[test]
    fn enum_fields_compare_by_canonical_token() {
        let predicate = Predicate::All {
            all: vec![
                Predicate::leaf(
                    FieldKey::Sex,
                    CmpOp::Eq,
                    CriterionValue::Text("female".into()),
                ),
                Predicate::leaf(
                    FieldKey::LtciGrade,
                    CmpOp::In,
                    CriterionValue::Texts(vec!["g1".into(), "g2".into(), "cognitive".into()]),
                ),
            ],
        };
        let profile = CanonicalProfile {
            sex: Slot::Known(Sex::Female),
            ltci_grade: Slot::Known(LtciGrade::Cognitive),
            ..CanonicalProfile::default()
        };
        assert_eq!(evaluate(&predicate, &profile).verdict, Verdict::Match);
    }

    #[test]
    fn region_comparison_trims_whitespace() {
        let predicate = Predicate::leaf(
            FieldKey::Region,
            CmpOp::Eq,
            CriterionValue::Text("강남구".into()),
        );
        let profile = CanonicalProfile {
            region: Slot::Known(" 강남구 ".into()),
            ..CanonicalProfile::default()
        };
        assert_eq!(evaluate(&predicate, &profile).verdict, Verdict::Match);
    }

    // ── undetermined_fields scoping ──────────────────────────────────────────

    #[test]
    fn matched_disjunction_branch_suppresses_sibling_unknowns() {
        let predicate = Predicate::All {
            all: vec![
                Predicate::leaf(
                    FieldKey::IncomeRatio,
                    CmpOp::AtMost,
                    CriterionValue::Number(0.5),
                ),
                Predicate::Any {
                    any: vec![
                        Predicate::leaf(
                            FieldKey::DisabilityGrade,
                            CmpOp::In,
                            CriterionValue::Numbers(vec![1.0, 2.0, 3.0]),
                        ),
                        Predicate::leaf(
                            FieldKey::Pregnancy,
                            CmpOp::Eq,
                            CriterionValue::Flag(true),
                        ),
                    ],
                },
            ],
        };

        // Grade matches the disjunction; pregnancy stays unknown but is
        // no longer worth asking about.  Income still gates.
        let profile = profile_with_grade(2);
        let fields = undetermined_fields(&predicate, &profile);
        assert_eq!(fields.into_iter().collect::<Vec<_>>(), vec![FieldKey::IncomeRatio]);
    }

    #[test]
    fn open_disjunction_reports_all_unknown_branches() {
        let predicate = Predicate::Any {
            any: vec![
                Predicate::leaf(
                    FieldKey::DisabilityGrade,
                    CmpOp::In,
                    CriterionValue::Numbers(vec![1.0, 2.0]),
                ),
                Predicate::leaf(FieldKey::Pregnancy, CmpOp::Eq, CriterionValue::Flag(true)),
            ],
        };
        let fields = undetermined_fields(&predicate, &CanonicalProfile::default());
        assert_eq!(
            fields.into_iter().collect::<Vec<_>>(),
            vec![FieldKey::DisabilityGrade, FieldKey::Pregnancy]
        );
    }

    #[test]
    fn no_fields_reported_when_verdict_is_settled() {
        let profile = CanonicalProfile {
            income_ratio: Slot::Known(0.4),
            disability_grade: Slot::Known(DisabilityGrade::new(1).unwrap()),
            ..CanonicalProfile::default()
        };
        assert!(undetermined_fields(&income_and_grade_predicate(), &profile).is_empty());
    }

    // ── Determinism ──────────────────────────────────────────────────────────

    #[test]
    fn evaluation_is_deterministic() {
        let profile = profile_with_grade(3);
        let first = evaluate(&income_and_grade_predicate(), &profile);
        let second = evaluate(&income_and_grade_predicate(), &profile);
        assert_eq!(first, second);
    }
}
