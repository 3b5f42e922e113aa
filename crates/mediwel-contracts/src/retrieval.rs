//! Retrieval verdicts and per-criterion explanations.
//!
//! `RetrievalResult` is ephemeral: recomputed on every retrieval call and
//! attached to the agent turn that answered from it, never persisted on its
//! own.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::policy::PolicyId;

/// Outcome of evaluating a predicate (or one leaf of it) against a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The profile satisfies the predicate.
    Match,
    /// The profile definitively fails the predicate.
    NoMatch,
    /// Unresolved profile fields could still change the outcome.
    Indeterminate,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Match => "match",
            Verdict::NoMatch => "no_match",
            Verdict::Indeterminate => "indeterminate",
        };
        write!(f, "{s}")
    }
}

/// The evaluated outcome of one predicate leaf, for user display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionOutcome {
    /// Rendered criterion, e.g. `income_ratio <= 0.5`.
    pub criterion: String,
    pub verdict: Verdict,
    /// Human-readable reason, e.g. `profile ratio 0.8 exceeds 0.5`.
    pub reason: String,
}

/// One ranked candidate returned by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub policy_id: PolicyId,
    /// Cosine similarity between the query and the policy text.
    pub similarity: f32,
    /// Rule-engine verdict for the whole predicate.  Never `NoMatch` in a
    /// retriever result set — those candidates are dropped.
    pub verdict: Verdict,
    /// Complete per-leaf explanation list, in predicate order.
    pub criteria: Vec<CriterionOutcome>,
}
