//! Consensus synthesis: the final, non-participant generation pass.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendError, ChatMessage, GenerateOptions, GenerateRequest, ModelBackend, TokenUsage,
};
use crate::persona;

use super::{Consensus, DebateMessage, Participant};

/// Reduces a full transcript into a unified answer and action items.
///
/// Uses one designated backend (by default the first roster entry). On vendor
/// failure the call is retried once; a second failure surfaces to the caller
/// without losing the underlying transcript or cost data.
pub struct ConsensusSynthesizer {
    backend: Arc<dyn ModelBackend>,
    retry_delay: Duration,
}

impl ConsensusSynthesizer {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub async fn synthesize(
        &self,
        question: &str,
        participants: &[Participant],
        transcript: &[DebateMessage],
        cancel: CancellationToken,
    ) -> Result<(Consensus, TokenUsage), BackendError> {
        let prompt = persona::synthesis_prompt(question, participants, transcript);
        let request = GenerateRequest {
            messages: vec![ChatMessage::user(prompt)],
            options: GenerateOptions {
                max_tokens: Some(1024),
                temperature: Some(0.3),
                cancel,
                ..Default::default()
            },
        };

        let mut last_error = None;
        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.retry_delay).await;
            }
            match self.backend.generate(&request).await {
                Ok(generation) => {
                    return Ok((parse_consensus(&generation.text), generation.usage));
                }
                Err(BackendError::Cancelled) => return Err(BackendError::Cancelled),
                Err(err) => {
                    tracing::warn!(
                        backend = self.backend.id(),
                        attempt,
                        error = %err,
                        "synthesis attempt failed"
                    );
                    last_error = Some(err);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| BackendError::upstream(self.backend.id(), None, "synthesis failed")))
    }
}

/// Split a synthesis response into summary text and action items.
///
/// Tolerant of formatting drift: a missing "Action items" section yields the
/// whole text as summary with no items.
fn parse_consensus(text: &str) -> Consensus {
    let mut summary_lines: Vec<&str> = Vec::new();
    let mut action_items: Vec<String> = Vec::new();
    let mut in_actions = false;

    for line in text.lines() {
        let trimmed = line.trim();
        let lowered = trimmed.trim_start_matches('#').trim_start().to_lowercase();
        if !in_actions && lowered.starts_with("action items") {
            in_actions = true;
            continue;
        }
        if in_actions {
            let item = trimmed.trim_start_matches(['-', '*']).trim();
            if !item.is_empty() {
                action_items.push(item.to_string());
            }
        } else {
            summary_lines.push(line);
        }
    }

    let mut summary = summary_lines.join("\n").trim().to_string();
    if summary.to_lowercase().starts_with("summary:") {
        summary = summary["summary:".len()..].trim().to_string();
    }

    Consensus {
        summary,
        action_items,
        implemented_at: None,
    }
}
