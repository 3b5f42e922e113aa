//! # mediwel-retrieval
//!
//! Hybrid policy retrieval: a semantic nearest-neighbor pass over policy
//! embeddings, intersected with rule-engine verdicts so no definitively
//! ineligible policy ever reaches the answer context.

pub mod catalog;
pub mod embed;
pub mod index;
pub mod retriever;

pub use catalog::{PolicyCatalog, TomlCatalog};
pub use embed::{cosine, EmbeddingProvider, HashEmbedder, DIMENSION};
pub use index::{EmbeddingIndex, InMemoryIndex};
pub use retriever::Retriever;
