//! Conversation, turn, and agent-state types.
//!
//! A conversation is an append-only, monotonic sequence of turns plus the
//! per-turn agent state.  Turns are never edited or removed.  Agent state is
//! mutated only by the orchestrator, through the conversation store.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::FieldKey;
use crate::retrieval::RetrievalResult;

/// Stable conversation identifier, issued by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to a resolved profile record in the profile store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileRef(pub String);

impl fmt::Display for ProfileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

/// One message exchange unit within a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Attached only to agent turns that answered from retrieval.
    pub retrieval: Option<Vec<RetrievalResult>>,
}

impl Turn {
    /// A user turn with the current timestamp.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            retrieval: None,
        }
    }

    /// An agent turn, optionally carrying the retrieval results it answered from.
    pub fn agent(content: impl Into<String>, retrieval: Option<Vec<RetrievalResult>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Agent,
            content: content.into(),
            timestamp: Utc::now(),
            retrieval,
        }
    }
}

/// The per-turn orchestration phase.
///
/// No phase is terminal for the conversation as a whole: each user turn
/// restarts the per-turn machine from `AwaitingInput`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    AwaitingInput,
    CollectingSlots,
    Retrieving,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentPhase::AwaitingInput => "awaiting_input",
            AgentPhase::CollectingSlots => "collecting_slots",
            AgentPhase::Retrieving => "retrieving",
            AgentPhase::Generating => "generating",
            AgentPhase::Completed => "completed",
            AgentPhase::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Why a turn ended in the `Failed` phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RetrievalUnavailable,
    GenerationTimeout,
    GenerationFailed,
}

/// Orchestrator-owned conversation state, persisted between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub phase: AgentPhase,
    /// Canonical slots the agent last asked the user to clarify.
    pub missing_slots: BTreeSet<FieldKey>,
    /// Set when `phase == Failed`, carrying the distinguishable reason.
    pub failure: Option<FailureReason>,
}

impl AgentState {
    /// The initial state of every conversation.
    pub fn awaiting_input() -> Self {
        Self {
            phase: AgentPhase::AwaitingInput,
            missing_slots: BTreeSet::new(),
            failure: None,
        }
    }

    /// A non-failed state in the given phase, preserving nothing.
    pub fn in_phase(phase: AgentPhase) -> Self {
        Self {
            phase,
            missing_slots: BTreeSet::new(),
            failure: None,
        }
    }

    /// A failed state with its distinguishable reason.
    pub fn failed(reason: FailureReason) -> Self {
        Self {
            phase: AgentPhase::Failed,
            missing_slots: BTreeSet::new(),
            failure: Some(reason),
        }
    }
}

/// What the caller wants from the current user turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// A question about policy eligibility — triggers slot collection and retrieval.
    EligibilityQuestion,
    /// Small talk — answered directly, no retrieval.
    ChitChat,
    /// The user is correcting previously supplied profile information.
    ProfileCorrection,
}
