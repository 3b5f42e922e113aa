//! The streaming emitter.
//!
//! `TurnStream` forwards generation fragments in arrival order and flushes
//! `EndOfTurn` exactly once per turn on every path: natural completion,
//! cancellation, backend failure, and deadline expiry.  The only buffering
//! is the accumulated answer text kept for the history commit.
//!
//! Turn-history contract: an agent turn is appended only when generation
//! ran to completion.  A cancelled or timed-out generation leaves the
//! already-streamed fragments with the consumer but appends nothing, so
//! history never contains half-answers.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use mediwel_contracts::conversation::{AgentState, ConversationId, FailureReason, Turn};
use mediwel_contracts::error::GenerationError;
use mediwel_contracts::retrieval::RetrievalResult;

use crate::cancel::CancelToken;
use crate::locks::TurnLock;
use crate::traits::{ConversationStore, FragmentStream};

/// One unit of streamed output.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFragment {
    Text(String),
    /// Terminal marker, emitted exactly once per turn.
    EndOfTurn,
}

enum Source {
    /// Pre-committed output (clarifications, acknowledgements, notices).
    Fixed(std::vec::IntoIter<String>),
    /// Live generation, committed on natural completion.
    Backend(FragmentStream),
}

/// What to persist when a backend stream completes naturally.
pub(crate) struct Commit {
    pub store: Arc<dyn ConversationStore>,
    pub conversation_id: ConversationId,
    pub retrieval: Option<Vec<RetrievalResult>>,
    pub final_state: AgentState,
}

/// The streamed result of one `handle_turn` call.
///
/// Holds the conversation's turn lock for its whole lifetime, so dropping
/// the stream (finished or not) releases the conversation.
pub struct TurnStream {
    source: Source,
    cancel: CancelToken,
    deadline: Option<Instant>,
    collected: String,
    commit: Option<Commit>,
    done: bool,
    _lock: Option<TurnLock>,
}

impl std::fmt::Debug for TurnStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnStream")
            .field("collected", &self.collected)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl TurnStream {
    /// A stream over output that was already committed to history.
    pub(crate) fn fixed(fragments: Vec<String>, lock: TurnLock) -> Self {
        Self {
            source: Source::Fixed(fragments.into_iter()),
            cancel: CancelToken::new(),
            deadline: None,
            collected: String::new(),
            commit: None,
            done: false,
            _lock: Some(lock),
        }
    }

    /// A stream forwarding a live generation backend.
    pub(crate) fn backend(
        stream: FragmentStream,
        cancel: CancelToken,
        deadline: Option<Instant>,
        commit: Commit,
        lock: TurnLock,
    ) -> Self {
        Self {
            source: Source::Backend(stream),
            cancel,
            deadline,
            collected: String::new(),
            commit: Some(commit),
            done: false,
            _lock: Some(lock),
        }
    }

    /// The token that cancels this turn's generation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn finish(&mut self, state: Option<AgentState>, turn: Option<Turn>) -> Option<OutputFragment> {
        self.done = true;
        if let Some(commit) = self.commit.take() {
            if let Some(turn) = turn {
                if let Err(e) = commit.store.append_turn(&commit.conversation_id, turn) {
                    warn!(conversation = %commit.conversation_id, error = %e, "turn commit failed");
                }
            }
            if let Some(state) = state {
                if let Err(e) = commit.store.set_state(&commit.conversation_id, state) {
                    warn!(conversation = %commit.conversation_id, error = %e, "state commit failed");
                }
            }
        }
        self._lock = None;
        Some(OutputFragment::EndOfTurn)
    }

    fn finish_complete(&mut self) -> Option<OutputFragment> {
        let (turn, state) = match &self.commit {
            Some(commit) => (
                Some(Turn::agent(
                    std::mem::take(&mut self.collected),
                    commit.retrieval.clone(),
                )),
                Some(commit.final_state.clone()),
            ),
            None => (None, None),
        };
        debug!("generation completed, committing turn");
        self.finish(state, turn)
    }

    fn finish_cancelled(&mut self) -> Option<OutputFragment> {
        debug!("generation cancelled, no turn appended");
        self.finish(Some(AgentState::awaiting_input()), None)
    }

    fn finish_timed_out(&mut self) -> Option<OutputFragment> {
        warn!("generation deadline exceeded");
        self.finish(Some(AgentState::failed(FailureReason::GenerationTimeout)), None)
    }

    fn finish_failed(&mut self, reason: &str) -> Option<OutputFragment> {
        warn!(reason, "generation backend failed mid-stream");
        self.finish(Some(AgentState::failed(FailureReason::GenerationFailed)), None)
    }
}

impl TurnStream {
    fn next_fixed(&mut self) -> Option<OutputFragment> {
        let next = match &mut self.source {
            Source::Fixed(fragments) => fragments.next(),
            Source::Backend(_) => None,
        };
        match next {
            Some(text) => Some(OutputFragment::Text(text)),
            None => {
                self.done = true;
                self._lock = None;
                Some(OutputFragment::EndOfTurn)
            }
        }
    }

    fn next_backend(&mut self) -> Option<OutputFragment> {
        if self.cancel.is_cancelled() {
            return self.finish_cancelled();
        }
        if self.deadline.is_some_and(|d| Instant::now() > d) {
            return self.finish_timed_out();
        }

        let item = match &mut self.source {
            Source::Backend(stream) => stream.next(),
            Source::Fixed(_) => None,
        };
        match item {
            Some(Ok(text)) => {
                self.collected.push_str(&text);
                Some(OutputFragment::Text(text))
            }
            Some(Err(GenerationError::TimedOut)) => self.finish_timed_out(),
            Some(Err(GenerationError::Backend(reason))) => self.finish_failed(&reason),
            None => self.finish_complete(),
        }
    }
}

/// A consumer that walks away mid-generation takes the disconnect path:
/// the phase returns to `AwaitingInput` and no turn is appended, same as
/// cancellation, so the next user turn enters cleanly.
impl Drop for TurnStream {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Some(commit) = self.commit.take() {
            debug!(conversation = %commit.conversation_id, "stream dropped mid-generation, no turn appended");
            if let Err(e) = commit
                .store
                .set_state(&commit.conversation_id, AgentState::awaiting_input())
            {
                warn!(conversation = %commit.conversation_id, error = %e, "state commit failed");
            }
        }
    }
}

impl Iterator for TurnStream {
    type Item = OutputFragment;

    fn next(&mut self) -> Option<OutputFragment> {
        if self.done {
            return None;
        }
        if matches!(self.source, Source::Fixed(_)) {
            self.next_fixed()
        } else {
            self.next_backend()
        }
    }
}
