//! The conversation orchestrator: the per-turn state machine.
//!
//! Each user turn runs the sub-machine
//!
//!   AwaitingInput → CollectingSlots → Retrieving → Generating → Completed
//!
//! with early exits for chit-chat, profile corrections, clarification
//! requests, and failures.  State is persisted through the conversation
//! store before every suspending call (shortlist, retrieval, generation),
//! never reconstructed from volatile memory afterwards.  No phase is
//! terminal for the conversation as a whole: the next user turn re-enters
//! from AwaitingInput, Completed, or Failed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use mediwel_contracts::conversation::{
    AgentPhase, AgentState, ConversationId, FailureReason, Intent, Turn,
};
use mediwel_contracts::error::{EngineError, EngineResult};
use mediwel_contracts::profile::{CanonicalProfile, FieldKey};
use mediwel_contracts::retrieval::RetrievalResult;
use mediwel_normalize::Normalizer;
use mediwel_rules::undetermined_fields;

use crate::cancel::CancelToken;
use crate::emitter::{Commit, TurnStream};
use crate::locks::{ConversationLocks, TurnLock};
use crate::prompt::{profile_summary, PolicySnippet, PromptContext};
use crate::traits::{
    ConversationStore, GenerationBackend, IntentClassifier, PolicyRetriever, ProfileStore,
};

const CORRECTION_ACK: &str =
    "프로필 수정 요청을 확인했습니다. 변경된 정보는 다음 질문부터 반영됩니다.";
const RETRIEVAL_NOTICE: &str =
    "정책 검색이 일시적으로 어렵습니다. 잠시 후 다시 시도해 주세요.";

/// Tunables for the turn machine.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Maximum candidates returned to the generation context.
    pub top_k: usize,
    /// Shortlist size for slot-gating analysis.
    pub shortlist_k: usize,
    /// Wall-clock deadline for one generation, checked per fragment.
    pub generation_timeout: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            top_k: 5,
            shortlist_k: 12,
            generation_timeout: Duration::from_secs(30),
        }
    }
}

/// The central orchestrator driving every conversation turn.
///
/// Owns nothing but the turn machine: all collaborators arrive as trait
/// objects and are shared across concurrent conversations.
pub struct Orchestrator {
    profiles: Arc<dyn ProfileStore>,
    conversations: Arc<dyn ConversationStore>,
    retriever: Arc<dyn PolicyRetriever>,
    backend: Arc<dyn GenerationBackend>,
    intents: Arc<dyn IntentClassifier>,
    normalizer: Normalizer,
    locks: ConversationLocks,
    options: OrchestratorOptions,
}

impl Orchestrator {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        conversations: Arc<dyn ConversationStore>,
        retriever: Arc<dyn PolicyRetriever>,
        backend: Arc<dyn GenerationBackend>,
        intents: Arc<dyn IntentClassifier>,
        normalizer: Normalizer,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            profiles,
            conversations,
            retriever,
            backend,
            intents,
            normalizer,
            locks: ConversationLocks::new(),
            options,
        }
    }

    /// Process one user turn, returning the output stream.
    ///
    /// The stream holds the conversation's turn lock until it finishes or
    /// is dropped; a concurrent second turn for the same conversation fails
    /// fast with `ConversationBusy`.
    ///
    /// # Errors
    ///
    /// `InvalidConversationState` when the stored phase is mid-turn (an
    /// integration bug, surfaced without retry), `ConversationBusy` for a
    /// concurrent turn, plus store and backend errors.
    pub fn handle_turn(&self, id: &ConversationId, user_text: &str) -> EngineResult<TurnStream> {
        let lock = self.locks.acquire(id)?;

        let state = self.conversations.get_state(id)?;
        match state.phase {
            AgentPhase::AwaitingInput | AgentPhase::Completed | AgentPhase::Failed => {}
            phase => {
                warn!(conversation = %id, %phase, "turn rejected: conversation is mid-turn");
                return Err(EngineError::InvalidConversationState {
                    conversation_id: id.to_string(),
                    phase: phase.to_string(),
                });
            }
        }

        self.conversations.append_turn(id, Turn::user(user_text))?;

        let intent = self.intents.classify(user_text);
        debug!(conversation = %id, ?intent, "turn classified");

        match intent {
            Intent::ChitChat => self.chit_chat_turn(id, user_text, lock),
            Intent::ProfileCorrection => self.correction_turn(id, lock),
            Intent::EligibilityQuestion => self.eligibility_turn(id, user_text, &state, lock),
        }
    }

    // ── Chit-chat ────────────────────────────────────────────────────────────

    /// Generate directly, no retrieval; the phase stays AwaitingInput once
    /// the answer is committed.
    fn chit_chat_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        lock: TurnLock,
    ) -> EngineResult<TurnStream> {
        let ctx = PromptContext {
            question: user_text.to_string(),
            profile_summary: None,
            snippets: Vec::new(),
        };
        self.generate(id, &ctx, None, AgentState::awaiting_input(), lock)
    }

    // ── Profile correction ───────────────────────────────────────────────────

    /// Acknowledge without retrieval.  Profile mutation belongs to the
    /// profile store's owner; the next turn re-resolves the profile and
    /// sees the correction.
    fn correction_turn(&self, id: &ConversationId, lock: TurnLock) -> EngineResult<TurnStream> {
        self.conversations.append_turn(id, Turn::agent(CORRECTION_ACK, None))?;
        self.conversations.set_state(id, AgentState::awaiting_input())?;
        Ok(TurnStream::fixed(vec![CORRECTION_ACK.to_string()], lock))
    }

    // ── Eligibility ──────────────────────────────────────────────────────────

    fn eligibility_turn(
        &self,
        id: &ConversationId,
        user_text: &str,
        entry_state: &AgentState,
        lock: TurnLock,
    ) -> EngineResult<TurnStream> {
        let profile_ref = self.conversations.profile_ref(id)?;
        let raw = self.profiles.resolved_profile(&profile_ref)?;
        let (profile, unrecognized) = self.normalizer.normalize(&raw);
        if !unrecognized.is_empty() {
            debug!(conversation = %id, ?unrecognized, "profile fields could not be canonicalized");
        }

        self.conversations
            .set_state(id, AgentState::in_phase(AgentPhase::CollectingSlots))?;

        let needed = match self.gating_slots(user_text, &profile) {
            Ok(needed) => needed,
            Err(e @ EngineError::RetrievalUnavailable { .. }) => {
                return self.retrieval_failure_turn(id, lock, &e);
            }
            // Any other retrieval-stage error still leaves the machine in a
            // re-enterable phase before it surfaces.
            Err(e) => {
                warn!(conversation = %id, error = %e, "slot analysis failed");
                self.conversations
                    .set_state(id, AgentState::failed(FailureReason::RetrievalUnavailable))?;
                return Err(e);
            }
        };

        // Ask at most once per missing-slot set: when the user's follow-up
        // left the same fields unresolved, answer from partial information
        // instead of re-asking.
        if !needed.is_empty() && needed != entry_state.missing_slots {
            return self.clarification_turn(id, needed, lock);
        }
        if !needed.is_empty() {
            info!(conversation = %id, ?needed, "slots still missing, answering from partial information");
        }

        self.conversations
            .set_state(id, AgentState::in_phase(AgentPhase::Retrieving))?;
        let results = match self.retriever.retrieve(user_text, &profile, self.options.top_k) {
            Ok(results) => results,
            Err(e @ EngineError::RetrievalUnavailable { .. }) => {
                return self.retrieval_failure_turn(id, lock, &e);
            }
            Err(e) => {
                warn!(conversation = %id, error = %e, "retrieval failed");
                self.conversations
                    .set_state(id, AgentState::failed(FailureReason::RetrievalUnavailable))?;
                return Err(e);
            }
        };
        info!(conversation = %id, candidates = results.len(), "retrieval complete");

        let ctx = PromptContext {
            question: user_text.to_string(),
            profile_summary: Some(profile_summary(&profile)),
            snippets: self.snippets(&results),
        };
        self.generate(
            id,
            &ctx,
            Some(results),
            AgentState::in_phase(AgentPhase::Completed),
            lock,
        )
    }

    /// Unknown fields that gate at least one shortlisted policy's verdict.
    fn gating_slots(
        &self,
        query: &str,
        profile: &CanonicalProfile,
    ) -> EngineResult<BTreeSet<FieldKey>> {
        let shortlist = self.retriever.shortlist(query, self.options.shortlist_k)?;
        let mut needed = BTreeSet::new();
        for policy in &shortlist {
            needed.extend(undetermined_fields(&policy.predicate, profile));
        }
        Ok(needed)
    }

    /// Emit one clarification turn and suspend back to AwaitingInput.
    fn clarification_turn(
        &self,
        id: &ConversationId,
        needed: BTreeSet<FieldKey>,
        lock: TurnLock,
    ) -> EngineResult<TurnStream> {
        let text = clarification_text(&needed);
        info!(conversation = %id, ?needed, "asking for clarification, retrieval skipped");

        self.conversations.append_turn(id, Turn::agent(&text, None))?;
        self.conversations.set_state(
            id,
            AgentState {
                phase: AgentPhase::AwaitingInput,
                missing_slots: needed,
                failure: None,
            },
        )?;
        Ok(TurnStream::fixed(vec![text], lock))
    }

    /// Retrieval stayed unavailable after the retriever's own retry: append
    /// a visible try-again notice and fail the turn.
    fn retrieval_failure_turn(
        &self,
        id: &ConversationId,
        lock: TurnLock,
        err: &EngineError,
    ) -> EngineResult<TurnStream> {
        warn!(conversation = %id, error = %err, "retrieval unavailable, turn failed");
        self.conversations.append_turn(id, Turn::agent(RETRIEVAL_NOTICE, None))?;
        self.conversations
            .set_state(id, AgentState::failed(FailureReason::RetrievalUnavailable))?;
        Ok(TurnStream::fixed(vec![RETRIEVAL_NOTICE.to_string()], lock))
    }

    /// Start generation and hand the fragment stream to the emitter.
    fn generate(
        &self,
        id: &ConversationId,
        ctx: &PromptContext,
        retrieval: Option<Vec<RetrievalResult>>,
        final_state: AgentState,
        lock: TurnLock,
    ) -> EngineResult<TurnStream> {
        self.conversations
            .set_state(id, AgentState::in_phase(AgentPhase::Generating))?;

        let cancel = CancelToken::new();
        let stream = match self.backend.generate(ctx, cancel.clone()) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(conversation = %id, error = %e, "generation backend refused the call");
                self.conversations
                    .set_state(id, AgentState::failed(FailureReason::GenerationFailed))?;
                return Err(e);
            }
        };

        let deadline = Instant::now() + self.options.generation_timeout;
        Ok(TurnStream::backend(
            stream,
            cancel,
            Some(deadline),
            Commit {
                store: Arc::clone(&self.conversations),
                conversation_id: id.clone(),
                retrieval,
                final_state,
            },
            lock,
        ))
    }

    fn snippets(&self, results: &[RetrievalResult]) -> Vec<PolicySnippet> {
        results
            .iter()
            .map(|r| {
                let policy = self.retriever.get(&r.policy_id);
                PolicySnippet {
                    title: policy
                        .as_ref()
                        .map(|p| p.title.clone())
                        .unwrap_or_else(|| r.policy_id.to_string()),
                    verdict: r.verdict,
                    similarity: r.similarity,
                    criteria: r.criteria.clone(),
                    benefits: policy.and_then(|p| p.benefits),
                }
            })
            .collect()
    }
}

fn clarification_text(needed: &BTreeSet<FieldKey>) -> String {
    let fields: Vec<&str> = needed.iter().map(|f| field_label(*f)).collect();
    format!(
        "정확한 안내를 위해 다음 정보가 필요합니다: {}. 알려주시면 바로 확인해 드릴게요.",
        fields.join(", ")
    )
}

fn field_label(field: FieldKey) -> &'static str {
    match field {
        FieldKey::Age => "나이(생년월일)",
        FieldKey::Sex => "성별",
        FieldKey::Insurance => "건강보험 자격",
        FieldKey::BenefitTier => "기초생활보장 급여 종류",
        FieldKey::DisabilityGrade => "장애 등급",
        FieldKey::LtciGrade => "장기요양 등급",
        FieldKey::Pregnancy => "임신 여부",
        FieldKey::IncomeRatio => "소득 수준(중위소득 대비)",
        FieldKey::Region => "거주 지역",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;

    use mediwel_contracts::conversation::ProfileRef;
    use mediwel_contracts::error::GenerationError;
    use mediwel_contracts::policy::{CmpOp, CriterionValue, Policy, PolicyId, Predicate};
    use mediwel_contracts::profile::RawProfile;
    use mediwel_contracts::retrieval::{CriterionOutcome, Verdict};

    use crate::emitter::OutputFragment;
    use crate::intent::KeywordIntentClassifier;
    use crate::memory::{InMemoryConversationStore, InMemoryProfileStore};
    use crate::traits::FragmentStream;

    use super::*;

    // ── Mock helpers ─────────────────────────────────────────────────────────

    /// Conversation store decorator that records every persisted phase.
    struct RecordingStore {
        inner: InMemoryConversationStore,
        phases: Arc<Mutex<Vec<AgentPhase>>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryConversationStore::new(),
                phases: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ConversationStore for RecordingStore {
        fn create(&self, id: &ConversationId, profile: &ProfileRef) -> EngineResult<()> {
            self.inner.create(id, profile)
        }
        fn append_turn(&self, id: &ConversationId, turn: Turn) -> EngineResult<()> {
            self.inner.append_turn(id, turn)
        }
        fn get_state(&self, id: &ConversationId) -> EngineResult<AgentState> {
            self.inner.get_state(id)
        }
        fn set_state(&self, id: &ConversationId, state: AgentState) -> EngineResult<()> {
            self.phases.lock().unwrap().push(state.phase);
            self.inner.set_state(id, state)
        }
        fn profile_ref(&self, id: &ConversationId) -> EngineResult<ProfileRef> {
            self.inner.profile_ref(id)
        }
        fn history(&self, id: &ConversationId) -> EngineResult<Vec<Turn>> {
            self.inner.history(id)
        }
    }

    /// What the mock retriever reports instead of answering.
    #[derive(Debug, Clone, Copy, PartialEq)]
    enum MockFailure {
        Unavailable,
        Storage,
    }

    impl MockFailure {
        fn to_error(self) -> EngineError {
            match self {
                MockFailure::Unavailable => EngineError::RetrievalUnavailable {
                    reason: "index offline".to_string(),
                },
                MockFailure::Storage => EngineError::StorageError {
                    reason: "index backend read failed".to_string(),
                },
            }
        }
    }

    /// A retriever with a canned shortlist and canned results.
    struct MockRetriever {
        policies: Vec<Policy>,
        results: Vec<RetrievalResult>,
        failure: Option<MockFailure>,
        retrieve_calls: Arc<Mutex<u32>>,
    }

    impl PolicyRetriever for MockRetriever {
        fn retrieve(
            &self,
            _query: &str,
            _profile: &CanonicalProfile,
            _top_k: usize,
        ) -> EngineResult<Vec<RetrievalResult>> {
            *self.retrieve_calls.lock().unwrap() += 1;
            if let Some(kind) = self.failure {
                return Err(kind.to_error());
            }
            Ok(self.results.clone())
        }

        fn shortlist(&self, _query: &str, _k: usize) -> EngineResult<Vec<Policy>> {
            if let Some(kind) = self.failure {
                return Err(kind.to_error());
            }
            Ok(self.policies.clone())
        }

        fn get(&self, id: &PolicyId) -> Option<Policy> {
            self.policies.iter().find(|p| &p.id == id).cloned()
        }
    }

    /// A backend that streams canned fragments and counts calls.
    struct ScriptedBackend {
        fragments: Vec<String>,
        calls: Arc<Mutex<u32>>,
    }

    impl GenerationBackend for ScriptedBackend {
        fn generate(
            &self,
            _ctx: &PromptContext,
            _cancel: CancelToken,
        ) -> EngineResult<FragmentStream> {
            *self.calls.lock().unwrap() += 1;
            let items: Vec<Result<String, GenerationError>> =
                self.fragments.iter().cloned().map(Ok).collect();
            Ok(Box::new(items.into_iter()))
        }
    }

    fn senior_policy() -> Policy {
        Policy {
            id: PolicyId("policy-senior-dental".to_string()),
            title: "저소득 장애인 의료비 지원".to_string(),
            description: "저소득층 등록 장애인의 의료비 본인부담금을 지원".to_string(),
            benefits: Some("의료비 본인부담금 지원".to_string()),
            region: None,
            predicate: Predicate::All {
                all: vec![
                    Predicate::leaf(
                        FieldKey::IncomeRatio,
                        CmpOp::AtMost,
                        CriterionValue::Number(0.5),
                    ),
                    Predicate::leaf(
                        FieldKey::DisabilityGrade,
                        CmpOp::In,
                        CriterionValue::Numbers(vec![1.0, 2.0, 3.0]),
                    ),
                ],
            },
            embedding: Vec::new(),
        }
    }

    fn match_result() -> RetrievalResult {
        RetrievalResult {
            policy_id: PolicyId("policy-senior-dental".to_string()),
            similarity: 0.87,
            verdict: Verdict::Match,
            criteria: vec![CriterionOutcome {
                criterion: "income_ratio <= 0.5".to_string(),
                verdict: Verdict::Match,
                reason: "profile income_ratio 0.4 satisfies the criterion".to_string(),
            }],
        }
    }

    struct Fixture {
        orchestrator: Orchestrator,
        conversations: Arc<RecordingStore>,
        retrieve_calls: Arc<Mutex<u32>>,
        backend_calls: Arc<Mutex<u32>>,
        id: ConversationId,
    }

    fn fixture(raw: RawProfile, failure: Option<MockFailure>) -> Fixture {
        let profiles = Arc::new(InMemoryProfileStore::new());
        let profile_ref = ProfileRef("p-1".to_string());
        profiles.insert(profile_ref.clone(), raw).unwrap();

        let conversations = Arc::new(RecordingStore::new());
        let id = ConversationId("c-1".to_string());
        conversations.create(&id, &profile_ref).unwrap();

        let retrieve_calls = Arc::new(Mutex::new(0));
        let retriever = Arc::new(MockRetriever {
            policies: vec![senior_policy()],
            results: vec![match_result()],
            failure,
            retrieve_calls: retrieve_calls.clone(),
        });

        let backend_calls = Arc::new(Mutex::new(0));
        let backend = Arc::new(ScriptedBackend {
            fragments: vec!["지원 ".to_string(), "가능합니다.".to_string()],
            calls: backend_calls.clone(),
        });

        let orchestrator = Orchestrator::new(
            profiles,
            conversations.clone(),
            retriever,
            backend,
            Arc::new(KeywordIntentClassifier::new()),
            Normalizer::new(NaiveDate::from_ymd_opt(2025, 6, 15).unwrap()),
            OrchestratorOptions::default(),
        );

        Fixture {
            orchestrator,
            conversations,
            retrieve_calls,
            backend_calls,
            id,
        }
    }

    fn complete_profile() -> RawProfile {
        RawProfile {
            income_ratio: Some("40%".to_string()),
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        }
    }

    fn drain(stream: TurnStream) -> Vec<OutputFragment> {
        stream.collect()
    }

    // ── Test cases ───────────────────────────────────────────────────────────

    /// A fully-known profile runs the whole machine without a clarification.
    #[test]
    fn complete_profile_runs_to_completed() {
        let fx = fixture(complete_profile(), None);
        let stream = fx
            .orchestrator
            .handle_turn(&fx.id, "장애인 의료비 지원 받을 수 있나요?")
            .unwrap();
        let out = drain(stream);

        assert_eq!(out.last(), Some(&OutputFragment::EndOfTurn));
        assert_eq!(out.len(), 3, "two fragments plus the marker: {out:?}");

        // Persisted phase sequence, commit included.
        assert_eq!(
            *fx.conversations.phases.lock().unwrap(),
            vec![
                AgentPhase::CollectingSlots,
                AgentPhase::Retrieving,
                AgentPhase::Generating,
                AgentPhase::Completed,
            ]
        );

        let history = fx.conversations.history(&fx.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "지원 가능합니다.");
        assert!(history[1].retrieval.is_some(), "agent turn carries retrieval results");
        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 1);
    }

    /// A missing gating slot produces exactly one clarification turn and no
    /// retrieval.
    #[test]
    fn missing_slot_asks_for_clarification_without_retrieval() {
        let raw = RawProfile {
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        };
        let fx = fixture(raw, None);
        let stream = fx.orchestrator.handle_turn(&fx.id, "의료비 지원 자격이 되나요?").unwrap();
        let out = drain(stream);

        assert_eq!(out.len(), 2);
        match &out[0] {
            OutputFragment::Text(text) => assert!(
                text.contains("소득 수준"),
                "clarification should name the missing field: {text}"
            ),
            other => panic!("expected clarification text, got {other:?}"),
        }

        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 0);
        assert_eq!(*fx.backend_calls.lock().unwrap(), 0);

        let state = fx.conversations.get_state(&fx.id).unwrap();
        assert_eq!(state.phase, AgentPhase::AwaitingInput);
        assert_eq!(
            state.missing_slots.into_iter().collect::<Vec<_>>(),
            vec![FieldKey::IncomeRatio]
        );

        // The clarification was appended eagerly.
        let history = fx.conversations.history(&fx.id).unwrap();
        assert_eq!(history.len(), 2);
    }

    /// If a follow-up leaves the same slots missing, the machine answers
    /// from partial information instead of re-asking.
    #[test]
    fn repeated_missing_slots_proceed_with_partial_information() {
        let raw = RawProfile {
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        };
        let fx = fixture(raw, None);

        let first = fx.orchestrator.handle_turn(&fx.id, "의료비 지원 자격이 되나요?").unwrap();
        drain(first);
        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 0);

        let second = fx.orchestrator.handle_turn(&fx.id, "소득은 잘 모르겠어요. 지원 되나요?").unwrap();
        let out = drain(second);
        assert_eq!(out.last(), Some(&OutputFragment::EndOfTurn));

        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 1, "second turn retrieves");
        assert_eq!(fx.conversations.get_state(&fx.id).unwrap().phase, AgentPhase::Completed);
    }

    /// Chit-chat generates directly; no retrieval, phase stays AwaitingInput.
    #[test]
    fn chit_chat_skips_retrieval_and_stays_awaiting() {
        let fx = fixture(complete_profile(), None);
        let stream = fx.orchestrator.handle_turn(&fx.id, "안녕하세요!").unwrap();
        let out = drain(stream);

        assert_eq!(out.last(), Some(&OutputFragment::EndOfTurn));
        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 0);
        assert_eq!(*fx.backend_calls.lock().unwrap(), 1);

        let state = fx.conversations.get_state(&fx.id).unwrap();
        assert_eq!(state.phase, AgentPhase::AwaitingInput);

        let history = fx.conversations.history(&fx.id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].retrieval.is_none());
    }

    /// Corrections are acknowledged without touching retrieval or generation.
    #[test]
    fn profile_correction_is_acknowledged_only() {
        let fx = fixture(complete_profile(), None);
        let stream = fx.orchestrator.handle_turn(&fx.id, "소득을 잘못 입력했어요").unwrap();
        let out = drain(stream);

        assert_eq!(out.len(), 2);
        assert_eq!(*fx.retrieve_calls.lock().unwrap(), 0);
        assert_eq!(*fx.backend_calls.lock().unwrap(), 0);
        assert_eq!(fx.conversations.get_state(&fx.id).unwrap().phase, AgentPhase::AwaitingInput);
    }

    /// Retrieval staying unavailable fails the turn with a visible notice.
    #[test]
    fn retrieval_unavailable_fails_with_notice() {
        let fx = fixture(complete_profile(), Some(MockFailure::Unavailable));
        let stream = fx.orchestrator.handle_turn(&fx.id, "의료비 지원 자격이 되나요?").unwrap();
        let out = drain(stream);

        assert_eq!(
            out,
            vec![
                OutputFragment::Text(RETRIEVAL_NOTICE.to_string()),
                OutputFragment::EndOfTurn,
            ]
        );

        let state = fx.conversations.get_state(&fx.id).unwrap();
        assert_eq!(state.phase, AgentPhase::Failed);
        assert_eq!(state.failure, Some(FailureReason::RetrievalUnavailable));

        // The notice is part of history so the failure is user-visible.
        let history = fx.conversations.history(&fx.id).unwrap();
        assert_eq!(history[1].content, RETRIEVAL_NOTICE);
    }

    /// Abandoning the stream mid-generation must not wedge the conversation:
    /// the phase returns to AwaitingInput and the next turn runs normally.
    #[test]
    fn abandoned_stream_leaves_conversation_re_enterable() {
        let fx = fixture(complete_profile(), None);
        let mut stream = fx
            .orchestrator
            .handle_turn(&fx.id, "장애인 의료비 지원 받을 수 있나요?")
            .unwrap();

        // Consume one fragment, then disconnect without cancelling.
        assert!(matches!(stream.next(), Some(OutputFragment::Text(_))));
        drop(stream);

        let state = fx.conversations.get_state(&fx.id).unwrap();
        assert_eq!(state.phase, AgentPhase::AwaitingInput);
        // Only the user turn persisted, no half-answer.
        assert_eq!(fx.conversations.history(&fx.id).unwrap().len(), 1);

        let retry = fx
            .orchestrator
            .handle_turn(&fx.id, "다시 물어볼게요. 지원 되나요?")
            .unwrap();
        drain(retry);
        assert_eq!(fx.conversations.get_state(&fx.id).unwrap().phase, AgentPhase::Completed);
    }

    /// Retrieval-stage errors other than unavailability surface to the
    /// caller but still leave the machine in a re-enterable phase.
    #[test]
    fn retriever_storage_error_surfaces_without_wedging() {
        let fx = fixture(complete_profile(), Some(MockFailure::Storage));

        match fx.orchestrator.handle_turn(&fx.id, "의료비 지원 자격이 되나요?") {
            Err(EngineError::StorageError { .. }) => {}
            other => panic!("expected StorageError, got {other:?}"),
        }
        assert_eq!(fx.conversations.get_state(&fx.id).unwrap().phase, AgentPhase::Failed);

        // The next turn is admitted; it fails on the same retriever fault,
        // not on the conversation state.
        match fx.orchestrator.handle_turn(&fx.id, "지원 되나요?") {
            Err(EngineError::StorageError { .. }) => {}
            other => panic!("expected StorageError, got {other:?}"),
        }
    }

    /// A second concurrent turn for the same conversation fails fast.
    #[test]
    fn concurrent_turn_is_rejected_as_busy() {
        let fx = fixture(complete_profile(), None);
        let in_flight = fx.orchestrator.handle_turn(&fx.id, "안녕하세요").unwrap();

        match fx.orchestrator.handle_turn(&fx.id, "또 안녕하세요") {
            Err(EngineError::ConversationBusy { conversation_id }) => {
                assert_eq!(conversation_id, "c-1");
            }
            other => panic!("expected ConversationBusy, got {other:?}"),
        }

        drain(in_flight);
        // The lock was released with the stream.
        assert!(fx.orchestrator.handle_turn(&fx.id, "이제 되나요?").is_ok());
    }

    /// Entering from a mid-turn phase is an integration error.
    #[test]
    fn mid_turn_phase_is_invalid_entry() {
        let fx = fixture(complete_profile(), None);
        fx.conversations
            .set_state(&fx.id, AgentState::in_phase(AgentPhase::Retrieving))
            .unwrap();

        match fx.orchestrator.handle_turn(&fx.id, "안녕하세요") {
            Err(EngineError::InvalidConversationState { phase, .. }) => {
                assert_eq!(phase, "retrieving");
            }
            other => panic!("expected InvalidConversationState, got {other:?}"),
        }

        // The rejected turn was not appended.
        assert!(fx.conversations.history(&fx.id).unwrap().is_empty());
    }

    /// A failed turn re-enters normally on the next user message.
    #[test]
    fn failed_phase_re_enters_on_next_turn() {
        let fx = fixture(complete_profile(), None);
        fx.conversations
            .set_state(&fx.id, AgentState::failed(FailureReason::GenerationTimeout))
            .unwrap();

        let stream = fx.orchestrator.handle_turn(&fx.id, "다시 물어볼게요. 지원 되나요?").unwrap();
        drain(stream);
        assert_eq!(fx.conversations.get_state(&fx.id).unwrap().phase, AgentPhase::Completed);
    }
}
