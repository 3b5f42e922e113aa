//! Generation context assembly.
//!
//! The prompt carries everything the backend needs to answer grounded in
//! retrieval: the question, a one-line profile summary, and one snippet per
//! candidate policy with its verdict and criterion explanations.  The
//! backend never sees raw profile records.

use std::fmt::Write as _;

use mediwel_contracts::profile::{CanonicalProfile, Slot};
use mediwel_contracts::retrieval::{CriterionOutcome, Verdict};

/// One candidate policy rendered for the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicySnippet {
    pub title: String,
    pub verdict: Verdict,
    pub similarity: f32,
    pub criteria: Vec<CriterionOutcome>,
    pub benefits: Option<String>,
}

/// Everything handed to the generation backend for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptContext {
    pub question: String,
    /// Absent for chit-chat turns, where no profile is consulted.
    pub profile_summary: Option<String>,
    /// Empty for chit-chat turns.
    pub snippets: Vec<PolicySnippet>,
}

impl PromptContext {
    /// Render the context as the flat text block backends consume.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "question: {}", self.question);
        if let Some(summary) = &self.profile_summary {
            let _ = writeln!(out, "profile: {summary}");
        }
        for snippet in &self.snippets {
            let _ = writeln!(
                out,
                "policy: {} [{}] similarity {:.3}",
                snippet.title, snippet.verdict, snippet.similarity
            );
            if let Some(benefits) = &snippet.benefits {
                let _ = writeln!(out, "  benefits: {benefits}");
            }
            for outcome in &snippet.criteria {
                let _ = writeln!(
                    out,
                    "  criterion: {} [{}] {}",
                    outcome.criterion, outcome.verdict, outcome.reason
                );
            }
        }
        out
    }
}

/// One line summarizing the canonical profile, unknowns omitted.
pub fn profile_summary(profile: &CanonicalProfile) -> String {
    let mut parts = Vec::new();

    fn push<T: std::fmt::Display>(parts: &mut Vec<String>, name: &str, slot: &Slot<T>) {
        match slot {
            Slot::Known(v) => parts.push(format!("{name}={v}")),
            Slot::NotApplicable => parts.push(format!("{name}=n/a")),
            Slot::Unknown => {}
        }
    }

    push(&mut parts, "age", &profile.age);
    push(&mut parts, "sex", &profile.sex);
    push(&mut parts, "insurance", &profile.insurance);
    push(&mut parts, "benefit_tier", &profile.benefit_tier);
    push(&mut parts, "disability_grade", &profile.disability_grade);
    push(&mut parts, "ltci_grade", &profile.ltci_grade);
    push(&mut parts, "pregnant", &profile.pregnant);
    push(&mut parts, "income_ratio", &profile.income_ratio);
    push(&mut parts, "region", &profile.region);

    if parts.is_empty() {
        "no attributes on file".to_string()
    } else {
        parts.join(", ")
    }
}
