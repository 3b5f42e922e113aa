//! The hybrid retriever: semantic candidates filtered and re-ranked by
//! eligibility verdicts.
//!
//! Ranking key: verdict bucket (Match before Indeterminate), then cosine
//! similarity descending, then ascending policy id.  NoMatch candidates
//! never surface.  The result set is at most `top_k` and never padded.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use mediwel_contracts::error::{EngineError, EngineResult};
use mediwel_contracts::policy::{Policy, PolicyId};
use mediwel_contracts::profile::{CanonicalProfile, Slot};
use mediwel_contracts::retrieval::{RetrievalResult, Verdict};
use mediwel_core::traits::PolicyRetriever;
use mediwel_rules::evaluate;

use crate::catalog::PolicyCatalog;
use crate::embed::EmbeddingProvider;
use crate::index::EmbeddingIndex;

/// Candidates fetched per requested result, to tolerate post-filter loss.
const OVERSAMPLE: usize = 3;

pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn EmbeddingIndex>,
    catalog: Arc<dyn PolicyCatalog>,
    retry_backoff: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn EmbeddingIndex>,
        catalog: Arc<dyn PolicyCatalog>,
    ) -> Self {
        Self {
            embedder,
            index,
            catalog,
            retry_backoff: Duration::from_millis(200),
        }
    }

    /// Backoff between the first embed failure and the single retry.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Embed the query, retrying once after a short backoff when the
    /// provider reports unavailability.  A second failure propagates.
    fn embed_query(&self, query: &str) -> EngineResult<Vec<f32>> {
        match self.embedder.embed(query) {
            Ok(vector) => Ok(vector),
            Err(EngineError::RetrievalUnavailable { reason }) => {
                warn!(reason, "embedding unavailable, retrying once");
                std::thread::sleep(self.retry_backoff);
                self.embedder.embed(query)
            }
            Err(e) => Err(e),
        }
    }

    /// Residency hard filter: a policy limited to a district the profile
    /// is known not to live in is excluded before rule evaluation.  An
    /// unknown profile region excludes nothing.
    fn region_excludes(policy: &Policy, profile: &CanonicalProfile) -> bool {
        match (&policy.region, &profile.region) {
            (Some(policy_region), Slot::Known(profile_region)) => {
                policy_region.trim() != profile_region.trim()
            }
            _ => false,
        }
    }
}

fn verdict_bucket(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Match => 0,
        Verdict::Indeterminate => 1,
        Verdict::NoMatch => 2,
    }
}

impl PolicyRetriever for Retriever {
    fn retrieve(
        &self,
        query: &str,
        profile: &CanonicalProfile,
        top_k: usize,
    ) -> EngineResult<Vec<RetrievalResult>> {
        let query_embedding = self.embed_query(query)?;
        let candidates = self
            .index
            .search(&query_embedding, top_k.saturating_mul(OVERSAMPLE))?;

        let mut results = Vec::new();
        let mut region_dropped = 0usize;
        let mut rule_dropped = 0usize;

        for (policy_id, similarity) in candidates {
            let Some(policy) = self.catalog.get(&policy_id) else {
                continue;
            };
            if Self::region_excludes(&policy, profile) {
                region_dropped += 1;
                continue;
            }

            let evaluation = evaluate(&policy.predicate, profile);
            if evaluation.verdict == Verdict::NoMatch {
                rule_dropped += 1;
                continue;
            }

            results.push(RetrievalResult {
                policy_id,
                similarity,
                verdict: evaluation.verdict,
                criteria: evaluation.criteria,
            });
        }

        results.sort_by(|a, b| {
            verdict_bucket(a.verdict)
                .cmp(&verdict_bucket(b.verdict))
                .then_with(|| b.similarity.total_cmp(&a.similarity))
                .then_with(|| a.policy_id.cmp(&b.policy_id))
        });
        results.truncate(top_k);

        debug!(
            returned = results.len(),
            region_dropped, rule_dropped, "retrieval ranked"
        );
        Ok(results)
    }

    fn shortlist(&self, query: &str, k: usize) -> EngineResult<Vec<Policy>> {
        let query_embedding = self.embed_query(query)?;
        let hits = self.index.search(&query_embedding, k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, _)| self.catalog.get(&id))
            .collect())
    }

    fn get(&self, id: &PolicyId) -> Option<Policy> {
        self.catalog.get(id)
    }
}
