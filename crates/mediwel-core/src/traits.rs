//! Collaborator seams for the conversation orchestrator.
//!
//! The orchestrator owns the turn state machine and nothing else: profiles,
//! conversation persistence, retrieval, intent classification, and answer
//! generation all arrive through these traits.  The core never depends on a
//! specific storage engine or model backend.

use mediwel_contracts::conversation::{AgentState, ConversationId, Intent, ProfileRef, Turn};
use mediwel_contracts::error::{EngineResult, GenerationError};
use mediwel_contracts::policy::{Policy, PolicyId};
use mediwel_contracts::profile::{CanonicalProfile, RawProfile};
use mediwel_contracts::retrieval::RetrievalResult;

use crate::cancel::CancelToken;
use crate::prompt::PromptContext;

/// A lazy, finite, non-restartable sequence of generated text fragments.
///
/// Backends surface their own deadline as `GenerationError::TimedOut`
/// mid-stream; the emitter additionally enforces a wall-clock deadline per
/// fragment.
pub type FragmentStream = Box<dyn Iterator<Item = Result<String, GenerationError>> + Send>;

/// Read-only access to resolved profile records.
///
/// The core receives exactly one resolved profile per conversation; account
/// and multi-profile management live outside this boundary.
pub trait ProfileStore: Send + Sync {
    fn resolved_profile(&self, profile_ref: &ProfileRef) -> EngineResult<RawProfile>;
}

/// Conversation persistence.
///
/// Every operation must be atomic per conversation id.  Turn order is
/// append-only; the orchestrator is the only writer of `AgentState`.
pub trait ConversationStore: Send + Sync {
    /// Register a conversation with its resolved profile reference.
    ///
    /// The initial state is `AgentState::awaiting_input()`.
    fn create(&self, id: &ConversationId, profile: &ProfileRef) -> EngineResult<()>;

    fn append_turn(&self, id: &ConversationId, turn: Turn) -> EngineResult<()>;

    fn get_state(&self, id: &ConversationId) -> EngineResult<AgentState>;

    /// Persist the agent state.  Called before every suspending operation so
    /// the machine can resume from storage, never from volatile memory.
    fn set_state(&self, id: &ConversationId, state: AgentState) -> EngineResult<()>;

    fn profile_ref(&self, id: &ConversationId) -> EngineResult<ProfileRef>;

    fn history(&self, id: &ConversationId) -> EngineResult<Vec<Turn>>;
}

/// The answer-generation backend.
///
/// `generate` returns the fragment stream without blocking for the full
/// answer.  Implementations must honor the cancel token cooperatively:
/// once it is set, the stream should wind down promptly.
pub trait GenerationBackend: Send + Sync {
    fn generate(&self, ctx: &PromptContext, cancel: CancelToken) -> EngineResult<FragmentStream>;
}

/// Classifies a user turn before the state machine routes it.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
}

/// Hybrid policy retrieval: semantic similarity intersected with rule
/// verdicts.
pub trait PolicyRetriever: Send + Sync {
    /// Ranked eligibility candidates for this query and profile.
    ///
    /// Never returns `NoMatch` results, never more than `top_k`.
    fn retrieve(
        &self,
        query: &str,
        profile: &CanonicalProfile,
        top_k: usize,
    ) -> EngineResult<Vec<RetrievalResult>>;

    /// Coarse semantic shortlist used for slot-gating analysis, before any
    /// rule filtering.
    fn shortlist(&self, query: &str, k: usize) -> EngineResult<Vec<Policy>>;

    /// Look up one policy by id, for answer-context assembly.
    fn get(&self, id: &PolicyId) -> Option<Policy>;
}
