//! In-memory reference implementations of the storage seams.
//!
//! Both stores keep their records behind a `Mutex`, making them safe to
//! share across concurrent conversations.  They are the reference
//! implementations for tests and demos; production deployments supply
//! their own `ProfileStore`/`ConversationStore` behind the same traits.

use std::collections::HashMap;
use std::sync::Mutex;

use mediwel_contracts::conversation::{AgentState, ConversationId, ProfileRef, Turn};
use mediwel_contracts::error::{EngineError, EngineResult};
use mediwel_contracts::profile::RawProfile;

use crate::traits::{ConversationStore, ProfileStore};

// ── Profile store ────────────────────────────────────────────────────────────

/// A read-only profile store seeded up front.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: Mutex<HashMap<ProfileRef, RawProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one resolved profile record.
    pub fn insert(&self, profile_ref: ProfileRef, raw: RawProfile) -> EngineResult<()> {
        let mut profiles = lock(&self.profiles)?;
        profiles.insert(profile_ref, raw);
        Ok(())
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn resolved_profile(&self, profile_ref: &ProfileRef) -> EngineResult<RawProfile> {
        let profiles = lock(&self.profiles)?;
        profiles
            .get(profile_ref)
            .cloned()
            .ok_or_else(|| EngineError::ProfileMissing {
                profile_ref: profile_ref.to_string(),
            })
    }
}

// ── Conversation store ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ConversationRecord {
    profile: ProfileRef,
    turns: Vec<Turn>,
    state: AgentState,
}

/// An append-only conversation store.
///
/// All operations take the single mutex, which makes each of them atomic
/// per conversation id (and in fact across ids, which is stricter than the
/// contract requires).
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: Mutex<HashMap<ConversationId, ConversationRecord>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_record<T>(
        &self,
        id: &ConversationId,
        f: impl FnOnce(&mut ConversationRecord) -> T,
    ) -> EngineResult<T> {
        let mut conversations = lock(&self.conversations)?;
        let record = conversations
            .get_mut(id)
            .ok_or_else(|| EngineError::UnknownConversation {
                conversation_id: id.to_string(),
            })?;
        Ok(f(record))
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create(&self, id: &ConversationId, profile: &ProfileRef) -> EngineResult<()> {
        let mut conversations = lock(&self.conversations)?;
        conversations.insert(
            id.clone(),
            ConversationRecord {
                profile: profile.clone(),
                turns: Vec::new(),
                state: AgentState::awaiting_input(),
            },
        );
        Ok(())
    }

    fn append_turn(&self, id: &ConversationId, turn: Turn) -> EngineResult<()> {
        self.with_record(id, |record| record.turns.push(turn))
    }

    fn get_state(&self, id: &ConversationId) -> EngineResult<AgentState> {
        self.with_record(id, |record| record.state.clone())
    }

    fn set_state(&self, id: &ConversationId, state: AgentState) -> EngineResult<()> {
        self.with_record(id, |record| record.state = state)
    }

    fn profile_ref(&self, id: &ConversationId) -> EngineResult<ProfileRef> {
        self.with_record(id, |record| record.profile.clone())
    }

    fn history(&self, id: &ConversationId) -> EngineResult<Vec<Turn>> {
        self.with_record(id, |record| record.turns.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> EngineResult<std::sync::MutexGuard<'_, T>> {
    mutex.lock().map_err(|e| EngineError::StorageError {
        reason: format!("store lock poisoned: {e}"),
    })
}
