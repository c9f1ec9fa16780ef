//! Debate sessions: types, state machine, turn loop, and synthesis.

pub mod agreement;
pub mod events;
pub mod orchestrator;
pub mod synthesis;

pub use agreement::{AgreementDetector, PhraseAgreement};
pub use events::DebateEvent;
pub use orchestrator::{DebateHandle, DebateOptions, DebateOrchestrator};
pub use synthesis::ConsensusSynthesizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::BackendError;
use crate::cost::CostSnapshot;
use crate::persona::DebateRole;

/// Lifecycle phase of a debate session.
///
/// Transitions are monotonic: `Idle → Starting → Debating → Synthesizing →
/// Complete`, with `Error` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateStatus {
    Idle,
    Starting,
    Debating,
    Synthesizing,
    Complete,
    Error,
}

impl DebateStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DebateStatus::Complete | DebateStatus::Error)
    }

    /// Whether `next` is a valid forward edge of the state machine.
    pub fn can_transition_to(&self, next: DebateStatus) -> bool {
        use DebateStatus::*;
        matches!(
            (self, next),
            (Idle, Starting) | (Starting, Debating) | (Debating, Synthesizing) | (Synthesizing, Complete)
        ) || (next == Error && !self.is_terminal())
    }
}

impl std::fmt::Display for DebateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DebateStatus::Idle => "idle",
            DebateStatus::Starting => "starting",
            DebateStatus::Debating => "debating",
            DebateStatus::Synthesizing => "synthesizing",
            DebateStatus::Complete => "complete",
            DebateStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

/// Why a human inserted a message mid-debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterjectionKind {
    Clarification,
    Challenge,
    Redirect,
}

/// Interjection metadata attached to a human-authored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interjection {
    pub kind: InterjectionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_message_id: Option<Uuid>,
}

/// Who wrote a debate message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageAuthor {
    Participant { id: String },
    Human,
}

/// One debating persona, bound to a backend and role for the session's
/// lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub backend_id: String,
    pub role: DebateRole,
    pub display_name: String,
    pub system_prompt: String,
}

/// A single entry in the append-only transcript.
///
/// External subsystems (voting) key off `id`; the engine never mutates a
/// message once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateMessage {
    pub id: Uuid,
    pub author: MessageAuthor,
    pub turn: u32,
    pub content: String,
    pub is_agreement: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interjection: Option<Interjection>,
    pub created_at: DateTime<Utc>,
}

/// The synthesized, unified answer produced once the debate concludes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub summary: String,
    pub action_items: Vec<String>,
    /// Set by an external caller after the user acts on the consensus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implemented_at: Option<DateTime<Utc>>,
}

/// A debate session: transcript, status, cost, and eventual consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: Uuid,
    pub question: String,
    pub participants: Vec<Participant>,
    pub messages: Vec<DebateMessage>,
    pub status: DebateStatus,
    pub cost: CostSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<Consensus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Errors surfaced by the orchestrator API.
#[derive(Debug, thiserror::Error)]
pub enum DebateError {
    #[error("insufficient participants: {available} available, at least 2 required")]
    InsufficientParticipants { available: usize },

    #[error("turn failed for `{backend}`: {source}")]
    TurnFailed {
        backend: String,
        #[source]
        source: BackendError,
    },

    #[error("consensus synthesis failed: {source}")]
    SynthesisFailed {
        #[source]
        source: BackendError,
    },

    #[error("debate cancelled")]
    Cancelled,

    #[error("debate session already finished")]
    Finished,

    #[error("internal error: {0}")]
    Internal(String),
}
