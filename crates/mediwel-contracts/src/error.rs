//! Error types for the mediwel engine.
//!
//! Normalization ambiguity is deliberately NOT an error: unrecognized input
//! becomes the `Unknown` slot sentinel and callers read the unknown-field
//! set instead.  Everything else that can go wrong is an `EngineError`.
//! Silent eligibility miscomputation is the worst failure mode in this
//! domain, so non-transient conditions are surfaced, never swallowed.

use thiserror::Error;

/// The unified error type for the mediwel engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The embedding backend or vector index is unreachable.
    ///
    /// Recovered once with backoff at the retriever; if the retry also
    /// fails, the turn ends in the `failed` state with a try-again notice.
    #[error("retrieval unavailable: {reason}")]
    RetrievalUnavailable { reason: String },

    /// The generation backend exceeded its deadline.
    #[error("generation timed out: {reason}")]
    GenerationTimeout { reason: String },

    /// The generation backend failed outright.
    #[error("generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// A turn arrived while the conversation was in a mid-turn phase.
    ///
    /// This is a programming/integration error: fatal, logged, surfaced to
    /// the caller without retry.
    #[error("conversation '{conversation_id}' is in unexpected phase '{phase}'")]
    InvalidConversationState {
        conversation_id: String,
        phase: String,
    },

    /// A second turn for the same conversation is already in flight.
    #[error("conversation '{conversation_id}' already has a turn in flight")]
    ConversationBusy { conversation_id: String },

    /// The conversation store has no record of this conversation.
    #[error("unknown conversation '{conversation_id}'")]
    UnknownConversation { conversation_id: String },

    /// The profile store could not resolve the referenced profile.
    #[error("profile '{profile_ref}' not found")]
    ProfileMissing { profile_ref: String },

    /// A store operation failed.
    #[error("storage error: {reason}")]
    StorageError { reason: String },

    /// Catalog or configuration data is malformed.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },
}

/// Convenience alias used throughout the mediwel crates.
pub type EngineResult<T> = Result<T, EngineError>;

/// Per-fragment error reported by a generation backend mid-stream.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The backend hit its own deadline while producing fragments.
    #[error("generation backend timed out")]
    TimedOut,

    /// The backend failed mid-stream.
    #[error("generation backend error: {0}")]
    Backend(String),
}
