//! # mediwel-core
//!
//! The conversation engine: a per-turn state machine that classifies
//! intent, fills missing eligibility slots, drives hybrid retrieval, and
//! streams generated answers with deterministic completion markers.
//!
//! Collaborators (profile store, conversation store, retriever, generation
//! backend) are trait objects defined in [`traits`]; in-memory reference
//! stores live in [`memory`].

pub mod cancel;
pub mod emitter;
pub mod intent;
pub mod locks;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod traits;

pub use cancel::CancelToken;
pub use emitter::{OutputFragment, TurnStream};
pub use intent::KeywordIntentClassifier;
pub use orchestrator::{Orchestrator, OrchestratorOptions};
pub use prompt::{PolicySnippet, PromptContext};
pub use traits::{
    ConversationStore, FragmentStream, GenerationBackend, IntentClassifier, PolicyRetriever,
    ProfileStore,
};
