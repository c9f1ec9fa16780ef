//! Debate personas and prompt construction.
//!
//! Pure string templating: no I/O, fully deterministic given inputs. The
//! orchestrator calls these to build each turn's system prompt, to frame the
//! other participant's latest message as conversational context, and to
//! instruct the synthesis pass.

use serde::{Deserialize, Serialize};

use crate::debate::{DebateMessage, InterjectionKind, MessageAuthor, Participant};

/// Analytical stance assigned to a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateRole {
    /// Architecture, trade-offs, long-term consequences
    Strategist,
    /// Implementation detail, edge cases, operational reality
    Implementer,
}

impl DebateRole {
    pub fn display_name(&self) -> &'static str {
        match self {
            DebateRole::Strategist => "Strategist",
            DebateRole::Implementer => "Implementer",
        }
    }

    fn stance(&self) -> &'static str {
        match self {
            DebateRole::Strategist => {
                "You approach problems from an architectural angle: weigh trade-offs, \
                 name the long-term consequences of each option, and keep the discussion \
                 anchored to the decision that actually has to be made."
            }
            DebateRole::Implementer => {
                "You approach problems from the implementation side: concrete mechanisms, \
                 edge cases, failure modes, and what it takes to operate the result. \
                 Ground abstract claims in what the code and infrastructure will really do."
            }
        }
    }
}

/// Overall tone of the discussion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebateStyle {
    #[default]
    Collaborative,
    Adversarial,
}

impl DebateStyle {
    fn tone_clause(&self) -> &'static str {
        match self {
            DebateStyle::Collaborative => {
                "Work toward a shared recommendation; treat your counterpart as a colleague."
            }
            DebateStyle::Adversarial => {
                "Stress-test your counterpart's position hard before conceding any point."
            }
        }
    }
}

/// System prompt for a participant with the given role and style.
///
/// The convergence phrasing in the etiquette section is what the default
/// agreement detector matches on; keep them in sync.
pub fn system_prompt_for(role: DebateRole, style: DebateStyle) -> String {
    format!(
        "You are the {name} in a structured two-party technical discussion.\n\n\
         {stance}\n\n\
         Collaboration etiquette:\n\
         - Respond directly to your counterpart's latest argument before adding new points\n\
         - When you disagree, say why and propose an alternative\n\
         - When your counterpart makes a valid point, acknowledge it explicitly\n\
         - {tone}\n\
         - If you genuinely agree with the overall direction, open your reply with \
           \"I agree with this approach\" so convergence is unambiguous\n\
         - Keep each contribution focused: two to four paragraphs",
        name = role.display_name(),
        stance = role.stance(),
        tone = style.tone_clause(),
    )
}

/// Frame the other participant's most recent message as conversational
/// context for the next speaker.
pub fn context_frame(other_name: &str, other_role: DebateRole, other_message: &str) -> String {
    format!(
        "{name} (the {role}) just responded:\n\n{message}\n\n\
         Continue the discussion: engage with their argument directly.",
        name = other_name,
        role = other_role.display_name(),
        message = other_message,
    )
}

/// The very first turn's prompt.
pub fn opening_prompt(question: &str, app_context: Option<&str>) -> String {
    match app_context {
        Some(context) => format!(
            "Context:\n{context}\n\n\
             The question under discussion is:\n\n{question}\n\n\
             Open the discussion with your initial position.",
        ),
        None => format!(
            "The question under discussion is:\n\n{question}\n\n\
             Open the discussion with your initial position.",
        ),
    }
}

/// Frame a human interjection for the next speaker.
pub fn interjection_frame(kind: InterjectionKind, content: &str) -> String {
    let label = match kind {
        InterjectionKind::Clarification => "a clarification",
        InterjectionKind::Challenge => "a challenge",
        InterjectionKind::Redirect => "a redirect",
    };
    format!(
        "The human observer interjected with {label}:\n\n{content}\n\n\
         Take this into account in your next contribution.",
    )
}

/// Instructions for the consensus synthesis pass over the full transcript.
pub fn synthesis_prompt(
    question: &str,
    participants: &[Participant],
    transcript: &[DebateMessage],
) -> String {
    let mut rendered = String::new();
    for message in transcript {
        let author = match &message.author {
            MessageAuthor::Human => "Human".to_string(),
            MessageAuthor::Participant { id } => participants
                .iter()
                .find(|p| p.backend_id == *id)
                .map(|p| format!("{} ({})", p.display_name, p.role.display_name()))
                .unwrap_or_else(|| id.clone()),
        };
        rendered.push_str(&format!("[turn {}] {}: {}\n\n", message.turn, author, message.content));
    }

    format!(
        "Two analysts discussed the following question:\n\n{question}\n\n\
         Full transcript:\n\n{rendered}\
         Produce the joint conclusion of this discussion. Your response must have \
         exactly two sections:\n\n\
         Summary:\n\
         A unified answer to the question. Where the analysts disagreed, resolve \
         the disagreement and say which position prevails and why.\n\n\
         Action items:\n\
         Concrete next steps, one per line, each starting with \"- \".",
    )
}
