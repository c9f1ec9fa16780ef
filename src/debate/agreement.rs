//! Agreement signal detection.
//!
//! Phrase matching against model output is inherently fuzzy, so the detection
//! strategy sits behind a trait: the phrase list is replaceable policy, not a
//! contract the orchestrator depends on.

/// Pluggable predicate deciding whether a message signals agreement.
pub trait AgreementDetector: Send + Sync {
    fn is_agreement_signal(&self, text: &str) -> bool;
}

/// Default detector: case-insensitive match against a phrase list.
///
/// The default phrases mirror the convergence wording the persona prompts ask
/// participants to use.
pub struct PhraseAgreement {
    phrases: Vec<String>,
}

impl PhraseAgreement {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phrases: phrases
                .into_iter()
                .map(|p| p.into().to_lowercase())
                .collect(),
        }
    }
}

impl Default for PhraseAgreement {
    fn default() -> Self {
        Self::new([
            "i agree with this approach",
            "i agree with your approach",
            "we are in agreement",
            "we've reached consensus",
            "we have reached consensus",
            "i'm fully aligned",
            "i am fully aligned",
        ])
    }
}

impl AgreementDetector for PhraseAgreement {
    fn is_agreement_signal(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.phrases.iter().any(|phrase| lowered.contains(phrase))
    }
}
