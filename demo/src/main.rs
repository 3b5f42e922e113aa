//! mediwel — Demo CLI
//!
//! Runs the conversation engine end to end against a small inline policy
//! catalog: deterministic hash embeddings, in-memory stores, and a scripted
//! generation backend that answers from the retrieval snippets.
//!
//! Usage:
//!   cargo run -p demo -- run-all
//!   cargo run -p demo -- eligibility-match
//!   cargo run -p demo -- clarification
//!   cargo run -p demo -- cancellation

use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mediwel_contracts::conversation::{ConversationId, ProfileRef};
use mediwel_contracts::error::{EngineResult, GenerationError};
use mediwel_contracts::profile::RawProfile;
use mediwel_contracts::retrieval::Verdict;
use mediwel_core::memory::{InMemoryConversationStore, InMemoryProfileStore};
use mediwel_core::traits::{ConversationStore, FragmentStream, GenerationBackend};
use mediwel_core::{
    CancelToken, KeywordIntentClassifier, Orchestrator, OrchestratorOptions, OutputFragment,
    PromptContext,
};
use mediwel_normalize::Normalizer;
use mediwel_retrieval::{HashEmbedder, InMemoryIndex, Retriever, TomlCatalog};

// ── Inline policy catalog ─────────────────────────────────────────────────────

const CATALOG: &str = r#"
[[policy]]
id = "senior-dental-implant"
title = "노인 임플란트 지원"
description = "만 65세 이상 저소득 어르신의 임플란트 시술비 본인부담금을 지원합니다"
benefits = "임플란트 시술비 본인부담금의 일부 지원"
predicate = { all = [{ field = "age", op = "at-least", value = 65 }, { field = "income_ratio", op = "at-most", value = 0.7 }] }

[[policy]]
id = "disabled-medical-expense"
title = "저소득 장애인 의료비 지원"
description = "등록 장애인 중 저소득 가구의 의료비 본인부담금을 지원합니다"
benefits = "진료비 본인부담금 지원"
predicate = { all = [{ field = "income_ratio", op = "at-most", value = 0.5 }, { field = "disability_grade", op = "in", value = [1, 2, 3] }] }

[[policy]]
id = "maternity-outpatient"
title = "임산부 외래 진료비 지원"
description = "임산부의 외래 진료비를 지원하는 사업입니다"
benefits = "외래 진료비 바우처"
predicate = { field = "pregnancy", op = "eq", value = true }

[[policy]]
id = "seoul-care-voucher"
title = "서울시 돌봄 바우처"
description = "서울특별시 거주 장기요양 등급자를 위한 돌봄 바우처"
benefits = "월 돌봄 서비스 바우처"
region = "서울특별시"
predicate = { field = "ltci_grade", op = "in", value = ["g1", "g2", "g3"] }
"#;

// ── Scripted generation backend ───────────────────────────────────────────────

/// Deterministic backend that composes its answer from the retrieval
/// snippets, then streams it word by word.
struct ScriptedBackend;

impl GenerationBackend for ScriptedBackend {
    fn generate(&self, ctx: &PromptContext, _cancel: CancelToken) -> EngineResult<FragmentStream> {
        let mut answer = String::new();
        if ctx.snippets.is_empty() {
            answer.push_str("안녕하세요! 의료복지 정책에 대해 무엇이든 물어보세요.");
        } else {
            for snippet in &ctx.snippets {
                match snippet.verdict {
                    Verdict::Match => {
                        answer.push_str(&format!("'{}' 사업의 지원 대상으로 확인됩니다. ", snippet.title));
                    }
                    Verdict::Indeterminate | Verdict::NoMatch => {
                        answer.push_str(&format!("'{}' 사업은 추가 확인이 필요합니다. ", snippet.title));
                    }
                }
                if let Some(benefits) = &snippet.benefits {
                    answer.push_str(&format!("지원 내용: {benefits}. "));
                }
            }
        }

        let fragments: Vec<Result<String, GenerationError>> =
            answer.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::new(fragments.into_iter()))
    }
}

// ── CLI definition ────────────────────────────────────────────────────────────

/// mediwel — medical-welfare eligibility conversation engine demo.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "mediwel eligibility engine demo",
    long_about = "Runs mediwel demo scenarios showing hybrid retrieval, slot\n\
                  clarification, and streaming with cancellation."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all three scenarios in sequence.
    RunAll,
    /// Scenario 1: fully-known profile, retrieval-grounded streamed answer.
    EligibilityMatch,
    /// Scenario 2: missing income slot triggers exactly one clarification.
    Clarification,
    /// Scenario 3: mid-stream cancellation leaves history untouched.
    Cancellation,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Structured logging; set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::RunAll => run_all(),
        Command::EligibilityMatch => run_eligibility_match(),
        Command::Clarification => run_clarification(),
        Command::Cancellation => run_cancellation(),
    };

    match result {
        Ok(()) => println!("All selected scenarios completed successfully."),
        Err(e) => {
            eprintln!("Demo error: {e}");
            std::process::exit(1);
        }
    }
}

fn run_all() -> EngineResult<()> {
    run_eligibility_match()?;
    run_clarification()?;
    run_cancellation()?;
    Ok(())
}

// ── Wiring ────────────────────────────────────────────────────────────────────

struct Demo {
    orchestrator: Orchestrator,
    conversations: Arc<InMemoryConversationStore>,
    id: ConversationId,
}

fn build_demo(scenario: &str, raw_profile: RawProfile) -> EngineResult<Demo> {
    let profiles = Arc::new(InMemoryProfileStore::new());
    let profile_ref = ProfileRef(format!("profile-{scenario}"));
    profiles.insert(profile_ref.clone(), raw_profile)?;

    let conversations = Arc::new(InMemoryConversationStore::new());
    let id = ConversationId(format!("conv-{scenario}"));
    conversations.create(&id, &profile_ref)?;

    let embedder = Arc::new(HashEmbedder::new());
    let catalog = Arc::new(TomlCatalog::from_toml_str(CATALOG)?);
    let index = Arc::new(InMemoryIndex::build(catalog.as_ref(), embedder.as_ref())?);
    let retriever = Arc::new(Retriever::new(embedder, index, catalog));

    let orchestrator = Orchestrator::new(
        profiles,
        conversations.clone(),
        retriever,
        Arc::new(ScriptedBackend),
        Arc::new(KeywordIntentClassifier::new()),
        Normalizer::new(Utc::now().date_naive()),
        OrchestratorOptions::default(),
    );

    Ok(Demo { orchestrator, conversations, id })
}

fn stream_turn(demo: &Demo, user_text: &str) -> EngineResult<()> {
    println!("  user > {user_text}");
    print!("  agent> ");
    let stream = demo.orchestrator.handle_turn(&demo.id, user_text)?;
    for fragment in stream {
        match fragment {
            OutputFragment::Text(text) => print!("{text}"),
            OutputFragment::EndOfTurn => println!("  [end-of-turn]"),
        }
    }
    Ok(())
}

// ── Scenarios ─────────────────────────────────────────────────────────────────

fn run_eligibility_match() -> EngineResult<()> {
    println!("— Scenario 1: eligibility match —");
    let demo = build_demo(
        "match",
        RawProfile {
            birth_date: Some("1955-03-10".to_string()),
            income_ratio: Some("40%".to_string()),
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        },
    )?;

    stream_turn(&demo, "장애인 의료비 지원을 받을 수 있나요?")?;

    let state = demo.conversations.get_state(&demo.id)?;
    println!("  final phase: {}", state.phase);
    println!();
    Ok(())
}

fn run_clarification() -> EngineResult<()> {
    println!("— Scenario 2: clarification —");
    let demo = build_demo(
        "clarify",
        RawProfile {
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        },
    )?;

    // First ask: income is unknown and gates the disability policy.
    stream_turn(&demo, "의료비 지원 자격이 되나요?")?;
    let state = demo.conversations.get_state(&demo.id)?;
    println!("  missing slots: {:?}", state.missing_slots);

    // Same slots still missing on the follow-up: answer from partial info.
    stream_turn(&demo, "소득은 잘 모르겠어요. 그래도 지원 되나요?")?;
    println!();
    Ok(())
}

fn run_cancellation() -> EngineResult<()> {
    println!("— Scenario 3: cancellation —");
    let demo = build_demo(
        "cancel",
        RawProfile {
            birth_date: Some("1955-03-10".to_string()),
            income_ratio: Some("40%".to_string()),
            disability_grade: Some("2급".to_string()),
            ..RawProfile::default()
        },
    )?;

    println!("  user > 장애인 의료비 지원을 받을 수 있나요?");
    print!("  agent> ");
    let mut stream = demo.orchestrator.handle_turn(&demo.id, "장애인 의료비 지원을 받을 수 있나요?")?;
    let cancel = stream.cancel_token();

    let mut forwarded = 0;
    for fragment in &mut stream {
        match fragment {
            OutputFragment::Text(text) => {
                print!("{text}");
                forwarded += 1;
                if forwarded == 2 {
                    cancel.cancel();
                }
            }
            OutputFragment::EndOfTurn => println!("  [end-of-turn after cancel]"),
        }
    }

    let history = demo.conversations.history(&demo.id)?;
    println!("  turns in history: {} (user turn only, no half-answer)", history.len());
    let state = demo.conversations.get_state(&demo.id)?;
    println!("  final phase: {}", state.phase);
    println!();
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("mediwel — Medical-Welfare Eligibility Engine");
    println!("Conversation Demo");
    println!("============================================");
    println!();
    println!("Per eligibility turn:");
    println!("  [1] Intent classified (eligibility / chit-chat / correction)");
    println!("  [2] Profile normalized to canonical slots (unknowns explicit)");
    println!("  [3] Gating slots checked against a semantic shortlist");
    println!("  [4] Hybrid retrieval: cosine ranking filtered by rule verdicts");
    println!("  [5] Answer streamed with a deterministic end-of-turn marker");
    println!();
}
