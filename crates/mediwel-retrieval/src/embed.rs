//! Embedding provider seam and the deterministic hash embedder.
//!
//! `HashEmbedder` is the demo/test provider: a token-hash bag-of-words
//! projected into a fixed-dimension signed space and L2-normalized.  It has
//! no semantic understanding, but it is deterministic, dependency-free, and
//! gives stable cosine rankings, which is exactly what the retrieval
//! pipeline and its tests need.  Production deployments plug a real model
//! behind the same trait.

use mediwel_contracts::error::EngineResult;

/// Produces a query/document embedding.
///
/// A transient backend outage is reported as
/// `EngineError::RetrievalUnavailable`; the retriever retries once.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;
}

/// Dimension of the hash embedding space.
pub const DIMENSION: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Deterministic bag-of-words hash embedder.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEmbedder;

impl HashEmbedder {
    pub fn new() -> Self {
        Self
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut vector = vec![0.0f32; DIMENSION];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let index = (hash % DIMENSION as u64) as usize;
            let sign = if (hash >> 32) & 1 == 1 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }
}

/// Lowercased alphanumeric tokens; `is_alphanumeric` covers Hangul, so
/// Korean policy text tokenizes without a language-specific splitter.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v = (f64::from(*v) / norm) as f32;
        }
    }
}

/// Cosine similarity with f64 accumulation and a zero-vector guard.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += f64::from(*x) * f64::from(*y);
        norm_a += f64::from(*x) * f64::from(*x);
        norm_b += f64::from(*y) * f64::from(*y);
    }
    let denominator = norm_a.sqrt() * norm_b.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        (dot / denominator) as f32
    }
}
