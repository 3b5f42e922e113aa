//! Deterministic keyword intent classification.
//!
//! A small cue-word router, not a model: correction cues are checked before
//! eligibility cues because a correction message ("제 소득을 잘못
//! 입력했어요, 지원 자격은요?") usually also mentions the benefit it was
//! about.  Anything without a cue is chit-chat.

use mediwel_contracts::conversation::Intent;

use crate::traits::IntentClassifier;

const CORRECTION_CUES: &[&str] = &[
    "수정", "잘못", "변경", "정정", "틀렸", "바꿔", "correction", "correct that", "i meant",
    "actually my",
];

const ELIGIBILITY_CUES: &[&str] = &[
    "자격", "지원", "혜택", "대상", "요건", "급여", "본인부담", "신청", "수급", "감면",
    "바우처", "benefit", "eligib", "qualify", "support", "subsid", "voucher", "apply",
];

/// The default `IntentClassifier`.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(&self, text: &str) -> Intent {
        let text = text.to_lowercase();
        if CORRECTION_CUES.iter().any(|cue| text.contains(cue)) {
            return Intent::ProfileCorrection;
        }
        if ELIGIBILITY_CUES.iter().any(|cue| text.contains(cue)) {
            return Intent::EligibilityQuestion;
        }
        Intent::ChitChat
    }
}
