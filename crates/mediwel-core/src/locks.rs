//! Single-writer discipline per conversation.
//!
//! A conversation may have at most one turn in flight.  The registry hands
//! out a guard per conversation id; a second acquisition while the first
//! guard lives fails fast with `ConversationBusy` instead of queueing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use mediwel_contracts::conversation::ConversationId;
use mediwel_contracts::error::{EngineError, EngineResult};

/// Registry of conversations that currently have a turn in flight.
#[derive(Debug, Clone, Default)]
pub struct ConversationLocks {
    in_flight: Arc<Mutex<HashSet<ConversationId>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the conversation for one turn.
    ///
    /// The claim is released when the returned guard is dropped, which for a
    /// streamed turn happens when the caller finishes (or abandons) the
    /// stream.
    pub fn acquire(&self, id: &ConversationId) -> EngineResult<TurnLock> {
        let mut in_flight = self.in_flight.lock().map_err(|e| EngineError::StorageError {
            reason: format!("lock registry poisoned: {e}"),
        })?;
        if !in_flight.insert(id.clone()) {
            return Err(EngineError::ConversationBusy {
                conversation_id: id.to_string(),
            });
        }
        Ok(TurnLock {
            id: id.clone(),
            registry: Arc::clone(&self.in_flight),
        })
    }
}

/// Guard proving exclusive ownership of one conversation's turn.
#[derive(Debug)]
pub struct TurnLock {
    id: ConversationId,
    registry: Arc<Mutex<HashSet<ConversationId>>>,
}

impl Drop for TurnLock {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.registry.lock() {
            in_flight.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> ConversationId {
        ConversationId(id.to_string())
    }

    #[test]
    fn second_acquisition_fails_fast() {
        let locks = ConversationLocks::new();
        let guard = locks.acquire(&conv("c-1")).unwrap();

        match locks.acquire(&conv("c-1")) {
            Err(EngineError::ConversationBusy { conversation_id }) => {
                assert_eq!(conversation_id, "c-1");
            }
            other => panic!("expected ConversationBusy, got {other:?}"),
        }

        drop(guard);
        assert!(locks.acquire(&conv("c-1")).is_ok());
    }

    #[test]
    fn different_conversations_are_independent() {
        let locks = ConversationLocks::new();
        let _a = locks.acquire(&conv("c-1")).unwrap();
        let _b = locks.acquire(&conv("c-2")).unwrap();
    }
}
