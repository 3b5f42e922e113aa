//! Brute-force cosine index over policy embeddings.
//!
//! The index is built once and read-only at request time, so it can be
//! shared across all concurrent retrievals without locking.

use tracing::debug;

use mediwel_contracts::error::EngineResult;
use mediwel_contracts::policy::PolicyId;

use crate::catalog::PolicyCatalog;
use crate::embed::{cosine, EmbeddingProvider};

/// Nearest-neighbor search over policy embeddings.
pub trait EmbeddingIndex: Send + Sync {
    /// The `k` most similar policies, scored by cosine similarity,
    /// descending, with ties broken by ascending policy id.
    fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(PolicyId, f32)>>;
}

/// Exhaustive-scan index.  Adequate for catalog sizes in the hundreds;
/// larger deployments supply an ANN-backed `EmbeddingIndex` instead.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    entries: Vec<(PolicyId, Vec<f32>)>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: PolicyId, embedding: Vec<f32>) {
        self.entries.push((id, embedding));
    }

    /// Index every catalog policy, embedding title + description for
    /// policies without a precomputed vector.
    pub fn build(
        catalog: &dyn PolicyCatalog,
        embedder: &dyn EmbeddingProvider,
    ) -> EngineResult<Self> {
        let mut index = Self::new();
        for policy in catalog.all() {
            let embedding = if policy.embedding.is_empty() {
                embedder.embed(&format!("{} {}", policy.title, policy.description))?
            } else {
                policy.embedding.clone()
            };
            index.insert(policy.id, embedding);
        }
        debug!(entries = index.entries.len(), "embedding index built");
        Ok(index)
    }
}

impl EmbeddingIndex for InMemoryIndex {
    fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<(PolicyId, f32)>> {
        let mut scored: Vec<(PolicyId, f32)> = self
            .entries
            .iter()
            .map(|(id, embedding)| (id.clone(), cosine(query, embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }
}
