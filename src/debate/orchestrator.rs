//! Debate orchestrator: the state machine driving the turn loop.
//!
//! One orchestrator task owns one session. It is the sole writer of the
//! message log and the cost aggregator; turns run strictly sequentially, and
//! control traffic (interjections, end, cancel) is serialized against turn
//! boundaries so it never interleaves with an in-flight append.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backend::{
    BackendError, BackendRegistry, ChatMessage, GenerateOptions, GenerateRequest, ModelBackend,
    StreamChunk, TokenUsage,
};
use crate::config::Config;
use crate::cost::CostAggregator;
use crate::persona::{self, DebateRole, DebateStyle};
use crate::store::{NullSessionStore, SessionStore};

use super::agreement::{AgreementDetector, PhraseAgreement};
use super::events::DebateEvent;
use super::synthesis::ConsensusSynthesizer;
use super::{
    DebateError, DebateMessage, DebateSession, DebateStatus, Interjection, InterjectionKind,
    MessageAuthor, Participant,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Tunables for new debate sessions.
#[derive(Debug, Clone)]
pub struct DebateOptions {
    /// Participant turns before the debate is forced into synthesis
    pub max_turns: u32,
    /// Fixed delay before the single per-turn retry
    pub turn_retry_delay: Duration,
    /// Backend id for synthesis; first roster entry when unset
    pub synthesis_backend: Option<String>,
    /// Output budget per turn
    pub max_tokens_per_turn: u32,
    /// Sampling temperature for participant turns
    pub temperature: f64,
}

impl Default for DebateOptions {
    fn default() -> Self {
        Self {
            max_turns: 12,
            turn_retry_delay: Duration::from_millis(500),
            synthesis_backend: None,
            max_tokens_per_turn: 1024,
            temperature: 0.7,
        }
    }
}

impl From<&Config> for DebateOptions {
    fn from(config: &Config) -> Self {
        Self {
            max_turns: config.max_turns,
            turn_retry_delay: config.turn_retry_delay,
            synthesis_backend: config.synthesis_backend.clone(),
            ..Self::default()
        }
    }
}

enum Command {
    Interject {
        content: String,
        kind: InterjectionKind,
        target_message_id: Option<Uuid>,
    },
    EndDebate,
}

/// Control surface for a running debate session.
pub struct DebateHandle {
    session_id: Uuid,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    task: JoinHandle<DebateSession>,
}

impl DebateHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Insert a human message into the transcript. It consumes a turn number
    /// but not a participant's slot: whoever was due to speak stays due.
    pub async fn interject(
        &self,
        content: impl Into<String>,
        kind: InterjectionKind,
        target_message_id: Option<Uuid>,
    ) -> Result<(), DebateError> {
        self.commands
            .send(Command::Interject {
                content: content.into(),
                kind,
                target_message_id,
            })
            .await
            .map_err(|_| DebateError::Finished)
    }

    /// Force an immediate transition into synthesis, regardless of agreement
    /// state. Any in-flight turn is aborted and its partial output discarded.
    pub async fn end_debate(&self) -> Result<(), DebateError> {
        self.commands
            .send(Command::EndDebate)
            .await
            .map_err(|_| DebateError::Finished)
    }

    /// Abort the session. The in-flight call is cancelled; appended messages
    /// and recorded cost are retained.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the session task to finish and return the final session.
    pub async fn join(self) -> Result<DebateSession, DebateError> {
        self.task
            .await
            .map_err(|e| DebateError::Internal(format!("session task failed: {}", e)))
    }
}

/// Creates and runs debate sessions.
///
/// Stateless between sessions: every `start` builds a fresh session, cost
/// aggregator, and event stream, so concurrent sessions share nothing but the
/// adapters and the prompt templates.
pub struct DebateOrchestrator {
    registry: Arc<BackendRegistry>,
    store: Arc<dyn SessionStore>,
    detector: Arc<dyn AgreementDetector>,
    options: DebateOptions,
}

impl DebateOrchestrator {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            store: Arc::new(NullSessionStore),
            detector: Arc::new(PhraseAgreement::default()),
            options: DebateOptions::default(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn AgreementDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_options(mut self, options: DebateOptions) -> Self {
        self.options = options;
        self
    }

    /// Start a debate over `question`.
    ///
    /// Fails with `InsufficientParticipants` when fewer than two backends are
    /// available; no session is created in that case. Otherwise returns a
    /// control handle and the event stream the hosting layer subscribes to.
    pub async fn start(
        &self,
        question: impl Into<String>,
        style: DebateStyle,
        app_context: Option<String>,
    ) -> Result<(DebateHandle, mpsc::Receiver<DebateEvent>), DebateError> {
        let roster = self.registry.default_roster();
        if roster.len() < 2 {
            return Err(DebateError::InsufficientParticipants {
                available: roster.len(),
            });
        }

        const ROLES: [DebateRole; 2] = [DebateRole::Strategist, DebateRole::Implementer];
        let participants: Vec<RunnerParticipant> = roster
            .iter()
            .enumerate()
            .map(|(index, backend)| {
                let role = ROLES[index % ROLES.len()];
                RunnerParticipant {
                    info: Participant {
                        backend_id: backend.id().to_string(),
                        role,
                        display_name: backend.descriptor().display_name.to_string(),
                        system_prompt: persona::system_prompt_for(role, style),
                    },
                    backend: backend.clone(),
                }
            })
            .collect();

        let synthesis_backend = match &self.options.synthesis_backend {
            Some(id) => match self.registry.resolve(id) {
                Ok(backend) => backend,
                Err(err) => {
                    tracing::warn!(
                        backend = %id,
                        error = %err,
                        "configured synthesis backend unavailable, using first participant"
                    );
                    participants[0].backend.clone()
                }
            },
            None => participants[0].backend.clone(),
        };

        let session = DebateSession {
            id: Uuid::new_v4(),
            question: question.into(),
            participants: participants.iter().map(|p| p.info.clone()).collect(),
            messages: Vec::new(),
            status: DebateStatus::Idle,
            cost: Default::default(),
            consensus: None,
            error_reason: None,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store.save_session(&session).await {
            tracing::warn!(session_id = %session.id, error = %err, "session store rejected new session");
        }

        tracing::info!(
            session_id = %session.id,
            participants = participants.len(),
            "starting debate"
        );

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let session_id = session.id;
        let runner = DebateRunner {
            session,
            participants,
            synthesis_backend,
            app_context,
            cost: CostAggregator::new(),
            detector: self.detector.clone(),
            store: self.store.clone(),
            events: event_tx,
            commands: command_rx,
            commands_closed: false,
            queued_interjections: Vec::new(),
            cancel: cancel.clone(),
            options: self.options.clone(),
            next_turn: 0,
            next_participant: 0,
            participant_turns: 0,
            end_requested: false,
        };
        let task = tokio::spawn(runner.run());

        Ok((
            DebateHandle {
                session_id,
                commands: command_tx,
                cancel,
                task,
            },
            event_rx,
        ))
    }
}

#[derive(Clone)]
struct RunnerParticipant {
    info: Participant,
    backend: Arc<dyn ModelBackend>,
}

struct TurnOutput {
    text: String,
    usage: TokenUsage,
}

enum TurnFlow {
    Completed(TurnOutput),
    Cancelled,
    /// A human override arrived mid-turn; partial output discarded.
    Ended,
}

struct DebateRunner {
    session: DebateSession,
    participants: Vec<RunnerParticipant>,
    synthesis_backend: Arc<dyn ModelBackend>,
    app_context: Option<String>,
    cost: CostAggregator,
    detector: Arc<dyn AgreementDetector>,
    store: Arc<dyn SessionStore>,
    events: mpsc::Sender<DebateEvent>,
    commands: mpsc::Receiver<Command>,
    commands_closed: bool,
    /// Interjections received mid-turn, applied once the turn resolves
    queued_interjections: Vec<(String, InterjectionKind, Option<Uuid>)>,
    cancel: CancellationToken,
    options: DebateOptions,
    next_turn: u32,
    next_participant: usize,
    participant_turns: u32,
    end_requested: bool,
}

impl DebateRunner {
    async fn run(mut self) -> DebateSession {
        self.set_status(DebateStatus::Starting).await;
        self.set_status(DebateStatus::Debating).await;

        loop {
            self.flush_queued_interjections().await;
            self.drain_commands().await;
            if self.cancel.is_cancelled() {
                return self.fail_cancelled().await;
            }
            if self.end_requested {
                tracing::info!(session_id = %self.session.id, "debate ended by human override");
                break;
            }
            if self.participant_turns >= self.options.max_turns {
                tracing::info!(session_id = %self.session.id, "maximum turn count reached");
                break;
            }

            let participant = self.participants[self.next_participant].clone();
            match self.execute_turn(&participant).await {
                Ok(TurnFlow::Cancelled) => return self.fail_cancelled().await,
                Ok(TurnFlow::Ended) => continue,
                Ok(TurnFlow::Completed(output)) => {
                    let is_agreement = self.detector.is_agreement_signal(&output.text);
                    let message = DebateMessage {
                        id: Uuid::new_v4(),
                        author: MessageAuthor::Participant {
                            id: participant.info.backend_id.clone(),
                        },
                        turn: self.next_turn,
                        content: output.text,
                        is_agreement,
                        interjection: None,
                        created_at: Utc::now(),
                    };
                    self.append_message(message).await;
                    self.participant_turns += 1;
                    self.record_cost(&participant.backend, output.usage).await;
                    self.next_participant = (self.next_participant + 1) % self.participants.len();
                    if self.mutual_agreement() {
                        tracing::info!(
                            session_id = %self.session.id,
                            "consecutive agreement detected"
                        );
                        break;
                    }
                }
                Err(source) => {
                    let error = DebateError::TurnFailed {
                        backend: participant.info.backend_id.clone(),
                        source,
                    };
                    return self.fail(error.to_string()).await;
                }
            }
        }

        self.synthesize().await
    }

    /// Run one participant turn, retrying once on a retryable failure.
    async fn execute_turn(
        &mut self,
        participant: &RunnerParticipant,
    ) -> Result<TurnFlow, BackendError> {
        let mut attempts = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(TurnFlow::Cancelled);
            }
            match self.attempt_turn(participant).await {
                Ok(flow) => return Ok(flow),
                Err(err) => {
                    attempts += 1;
                    if attempts >= 2 || !err.is_retryable() {
                        return Err(err);
                    }
                    tracing::warn!(
                        session_id = %self.session.id,
                        backend = %participant.info.backend_id,
                        error = %err,
                        "turn failed, retrying once"
                    );
                    tokio::time::sleep(self.options.turn_retry_delay).await;
                }
            }
        }
    }

    /// One streaming attempt. Forwards chunks in arrival order; nothing is
    /// appended here - the completed text is handed back to the turn loop.
    async fn attempt_turn(
        &mut self,
        participant: &RunnerParticipant,
    ) -> Result<TurnFlow, BackendError> {
        let request = GenerateRequest {
            messages: build_turn_messages(
                &participant.info,
                &self.session.participants,
                &self.session.question,
                self.app_context.as_deref(),
                &self.session.messages,
            ),
            options: GenerateOptions {
                max_tokens: Some(self.options.max_tokens_per_turn),
                temperature: Some(self.options.temperature),
                cancel: self.cancel.clone(),
                ..Default::default()
            },
        };

        tracing::debug!(
            session_id = %self.session.id,
            backend = %participant.info.backend_id,
            turn = self.next_turn,
            "participant turn starting"
        );

        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(TurnFlow::Cancelled),
            result = participant.backend.stream(&request) => result?,
        };

        let author = MessageAuthor::Participant {
            id: participant.info.backend_id.clone(),
        };
        let mut text = String::new();

        loop {
            let step = tokio::select! {
                _ = self.cancel.cancelled() => TurnStep::Cancelled,
                command = self.commands.recv(), if !self.commands_closed => TurnStep::Command(command),
                chunk = stream.next() => TurnStep::Chunk(chunk),
            };

            match step {
                TurnStep::Cancelled => return Ok(TurnFlow::Cancelled),
                TurnStep::Command(None) => self.commands_closed = true,
                TurnStep::Command(Some(Command::EndDebate)) => {
                    self.end_requested = true;
                    return Ok(TurnFlow::Ended);
                }
                TurnStep::Command(Some(Command::Interject {
                    content,
                    kind,
                    target_message_id,
                })) => {
                    // applied after this turn's append resolves
                    self.queued_interjections.push((content, kind, target_message_id));
                }
                TurnStep::Chunk(Some(StreamChunk::Text(delta))) => {
                    text.push_str(&delta);
                    self.emit(DebateEvent::Chunk {
                        session_id: self.session.id,
                        author: author.clone(),
                        turn: self.next_turn,
                        chunk: StreamChunk::Text(delta),
                    })
                    .await;
                }
                TurnStep::Chunk(Some(StreamChunk::Reasoning(delta))) => {
                    self.emit(DebateEvent::Chunk {
                        session_id: self.session.id,
                        author: author.clone(),
                        turn: self.next_turn,
                        chunk: StreamChunk::Reasoning(delta),
                    })
                    .await;
                }
                TurnStep::Chunk(Some(StreamChunk::Done { usage, finish })) => {
                    self.emit(DebateEvent::Chunk {
                        session_id: self.session.id,
                        author: author.clone(),
                        turn: self.next_turn,
                        chunk: StreamChunk::Done { usage, finish },
                    })
                    .await;
                    return Ok(TurnFlow::Completed(TurnOutput { text, usage }));
                }
                TurnStep::Chunk(Some(StreamChunk::Error(message))) => {
                    return Err(BackendError::upstream(
                        participant.info.backend_id.clone(),
                        None,
                        message,
                    ));
                }
                TurnStep::Chunk(None) => {
                    return Err(BackendError::upstream(
                        participant.info.backend_id.clone(),
                        None,
                        "stream ended without a terminal chunk",
                    ));
                }
            }
        }
    }

    async fn flush_queued_interjections(&mut self) {
        let queued = std::mem::take(&mut self.queued_interjections);
        for (content, kind, target_message_id) in queued {
            self.apply_interjection(content, kind, target_message_id).await;
        }
    }

    async fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Interject {
                    content,
                    kind,
                    target_message_id,
                } => self.apply_interjection(content, kind, target_message_id).await,
                Command::EndDebate => self.end_requested = true,
            }
        }
    }

    async fn apply_interjection(
        &mut self,
        content: String,
        kind: InterjectionKind,
        target_message_id: Option<Uuid>,
    ) {
        let message = DebateMessage {
            id: Uuid::new_v4(),
            author: MessageAuthor::Human,
            turn: self.next_turn,
            content,
            is_agreement: false,
            interjection: Some(Interjection {
                kind,
                target_message_id,
            }),
            created_at: Utc::now(),
        };
        self.append_message(message).await;
    }

    async fn append_message(&mut self, message: DebateMessage) {
        if let Err(err) = self.store.save_message(self.session.id, &message).await {
            tracing::warn!(
                session_id = %self.session.id,
                error = %err,
                "session store rejected message"
            );
        }
        self.emit(DebateEvent::MessageAppended {
            session_id: self.session.id,
            message: message.clone(),
        })
        .await;
        self.session.messages.push(message);
        self.next_turn += 1;
    }

    async fn record_cost(&mut self, backend: &Arc<dyn ModelBackend>, usage: TokenUsage) {
        self.cost
            .record(backend.as_ref(), usage.input_tokens, usage.output_tokens);
        self.session.cost = self.cost.snapshot();
        self.emit(DebateEvent::CostUpdated {
            session_id: self.session.id,
            snapshot: self.session.cost.clone(),
        })
        .await;
    }

    /// Consecutive mutual agreement across the two latest participant
    /// messages; interjections in between do not break the pair.
    fn mutual_agreement(&self) -> bool {
        let mut participant_messages = self
            .session
            .messages
            .iter()
            .rev()
            .filter(|m| matches!(m.author, MessageAuthor::Participant { .. }));
        matches!(
            (participant_messages.next(), participant_messages.next()),
            (Some(latest), Some(previous)) if latest.is_agreement && previous.is_agreement
        )
    }

    async fn synthesize(mut self) -> DebateSession {
        self.set_status(DebateStatus::Synthesizing).await;

        let synthesizer = ConsensusSynthesizer::new(self.synthesis_backend.clone())
            .with_retry_delay(self.options.turn_retry_delay);
        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(BackendError::Cancelled),
            result = synthesizer.synthesize(
                &self.session.question,
                &self.session.participants,
                &self.session.messages,
                self.cancel.clone(),
            ) => result,
        };

        match result {
            Ok((consensus, usage)) => {
                let backend = self.synthesis_backend.clone();
                self.record_cost(&backend, usage).await;
                self.session.consensus = Some(consensus.clone());
                self.set_status(DebateStatus::Complete).await;
                self.persist_session().await;
                self.emit(DebateEvent::Completed {
                    session_id: self.session.id,
                    consensus,
                    cost: self.session.cost.clone(),
                })
                .await;
                self.session
            }
            Err(BackendError::Cancelled) => self.fail_cancelled().await,
            Err(source) => {
                let error = DebateError::SynthesisFailed { source };
                self.fail(error.to_string()).await
            }
        }
    }

    async fn fail(mut self, reason: String) -> DebateSession {
        tracing::error!(session_id = %self.session.id, %reason, "debate session failed");
        self.session.error_reason = Some(reason.clone());
        self.set_status(DebateStatus::Error).await;
        self.persist_session().await;
        self.emit(DebateEvent::Errored {
            session_id: self.session.id,
            reason,
        })
        .await;
        self.session
    }

    async fn fail_cancelled(self) -> DebateSession {
        self.fail(DebateError::Cancelled.to_string()).await
    }

    async fn persist_session(&self) {
        if let Err(err) = self.store.save_session(&self.session).await {
            tracing::warn!(
                session_id = %self.session.id,
                error = %err,
                "session store rejected session"
            );
        }
    }

    async fn set_status(&mut self, next: DebateStatus) {
        debug_assert!(
            self.session.status.can_transition_to(next),
            "invalid status transition {} -> {}",
            self.session.status,
            next
        );
        self.session.status = next;
        self.emit(DebateEvent::StatusChanged {
            session_id: self.session.id,
            status: next,
        })
        .await;
    }

    async fn emit(&self, event: DebateEvent) {
        let _ = self.events.send(event).await;
    }
}

enum TurnStep {
    Cancelled,
    Command(Option<Command>),
    Chunk(Option<StreamChunk>),
}

/// Assemble the message list for a participant's turn: system prompt, the
/// opening prompt, the prior transcript, with the immediately preceding
/// message reframed as conversational context.
fn build_turn_messages(
    participant: &Participant,
    participants: &[Participant],
    question: &str,
    app_context: Option<&str>,
    transcript: &[DebateMessage],
) -> Vec<ChatMessage> {
    let mut messages = vec![
        ChatMessage::system(&participant.system_prompt),
        ChatMessage::user(persona::opening_prompt(question, app_context)),
    ];
    let last_index = transcript.len().checked_sub(1);

    for (index, entry) in transcript.iter().enumerate() {
        match &entry.author {
            MessageAuthor::Participant { id } if *id == participant.backend_id => {
                messages.push(ChatMessage::assistant(&entry.content));
            }
            MessageAuthor::Participant { id } => {
                let (name, role) = participants
                    .iter()
                    .find(|p| p.backend_id == *id)
                    .map(|p| (p.display_name.as_str(), p.role))
                    .unwrap_or((id.as_str(), DebateRole::Strategist));
                let content = if Some(index) == last_index {
                    persona::context_frame(name, role, &entry.content)
                } else {
                    format!("{} ({}): {}", name, role.display_name(), entry.content)
                };
                messages.push(ChatMessage::user(content));
            }
            MessageAuthor::Human => {
                let kind = entry
                    .interjection
                    .as_ref()
                    .map(|i| i.kind)
                    .unwrap_or(InterjectionKind::Clarification);
                messages.push(ChatMessage::user(persona::interjection_frame(
                    kind,
                    &entry.content,
                )));
            }
        }
    }

    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::ScriptedBackend;
    use crate::backend::ChatRole;
    use crate::store::InMemorySessionStore;

    const AGREE: &str = "I agree with this approach, let's proceed.";

    fn registry(backends: Vec<ScriptedBackend>, roster: &[&str]) -> Arc<BackendRegistry> {
        let mut registry = BackendRegistry::new(roster.iter().map(|s| s.to_string()).collect());
        for backend in backends {
            registry.register(Arc::new(backend));
        }
        Arc::new(registry)
    }

    fn fast_options() -> DebateOptions {
        DebateOptions {
            turn_retry_delay: Duration::from_millis(0),
            ..Default::default()
        }
    }

    async fn collect_events(mut rx: mpsc::Receiver<DebateEvent>) -> Vec<DebateEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn participant_ids(session: &DebateSession) -> Vec<String> {
        session
            .messages
            .iter()
            .filter_map(|m| match &m.author {
                MessageAuthor::Participant { id } => Some(id.clone()),
                MessageAuthor::Human => None,
            })
            .collect()
    }

    fn assert_gapless_turns(session: &DebateSession) {
        for (index, message) in session.messages.iter().enumerate() {
            assert_eq!(message.turn as usize, index, "turn numbers must be gapless");
        }
    }

    // Scenario A: both participants agree on round 3; synthesis starts after
    // message 6 (turn index 5), not earlier.
    #[tokio::test]
    async fn agreement_on_round_three() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("A queue decouples the producer.")
            .reply("Still prefer the queue for backpressure.")
            .reply(AGREE)
            .reply("Summary:\nUse a queue.\n\nAction items:\n- introduce the queue");
        let beta = ScriptedBackend::new("beta")
            .reply("A direct call is simpler to trace.")
            .reply("Conceded on backpressure, but tracing matters.")
            .reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, rx) = orchestrator
            .start("Should we use a queue or a direct call?", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        let events = collect_events(rx).await;

        assert_eq!(session.status, DebateStatus::Complete);
        assert_eq!(session.messages.len(), 6);
        assert_eq!(session.messages.last().unwrap().turn, 5);
        assert!(session.consensus.is_some());
        assert_gapless_turns(&session);

        // synthesizing must come after the sixth append, never earlier
        let mut appended = 0;
        for event in &events {
            match event {
                DebateEvent::MessageAppended { .. } => appended += 1,
                DebateEvent::StatusChanged {
                    status: DebateStatus::Synthesizing,
                    ..
                } => assert_eq!(appended, 6),
                _ => {}
            }
        }

        // status events follow the state machine edges exactly
        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                DebateEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                DebateStatus::Starting,
                DebateStatus::Debating,
                DebateStatus::Synthesizing,
                DebateStatus::Complete
            ]
        );
    }

    // Scenario B: one available backend means no session at all.
    #[tokio::test]
    async fn insufficient_participants() {
        let orchestrator = DebateOrchestrator::new(registry(
            vec![
                ScriptedBackend::new("alpha"),
                ScriptedBackend::new("beta").unavailable(),
            ],
            &["alpha", "beta"],
        ));
        let result = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await;
        assert!(matches!(
            result,
            Err(DebateError::InsufficientParticipants { available: 1 })
        ));
    }

    // Scenario C: human ends the debate after one message; the single-message
    // transcript is synthesized and the session completes.
    #[tokio::test]
    async fn end_debate_after_one_message() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("Opening position.")
            .reply("Summary:\nDone early.\n\nAction items:\n- follow up");
        // beta never finishes its turn, so the end override aborts it
        let beta = ScriptedBackend::new("beta").hang();

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, mut rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        while let Some(event) = rx.recv().await {
            if matches!(event, DebateEvent::MessageAppended { .. }) {
                break;
            }
        }
        handle.end_debate().await.unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.consensus.unwrap().summary, "Done early.");
    }

    // Scenario D: two consecutive failures on the same turn abort the session
    // while preserving the transcript and cost recorded so far.
    #[tokio::test]
    async fn double_failure_aborts_preserving_state() {
        let alpha = ScriptedBackend::new("alpha").reply_with_usage("Opening.", 200, 80);
        let beta = ScriptedBackend::new("beta").fail("boom").fail("boom again");

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Error);
        assert!(session.error_reason.unwrap().contains("beta"));
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.cost.rows.len(), 1);
        assert_eq!(session.cost.rows[0].backend_id, "alpha");
        assert_eq!(session.cost.total_input_tokens, 200);
    }

    // A retryable failure followed by a success keeps the debate going.
    #[tokio::test]
    async fn single_failure_is_retried() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("Opening.")
            .reply(AGREE)
            .reply("Summary:\nOk.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta").fail("transient").reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        assert_eq!(participant_ids(&session), vec!["alpha", "beta", "alpha"]);
    }

    // A permanent (auth) failure is not retried; the session errors at once.
    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let alpha = ScriptedBackend::new("alpha").fail_permanent("bad key").reply("unused");
        let beta = ScriptedBackend::new("beta");

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Error);
        assert!(session.messages.is_empty());
    }

    // A mid-stream error chunk counts as a turn failure and is retried.
    #[tokio::test]
    async fn mid_stream_error_is_retried() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("Opening.")
            .reply(AGREE)
            .reply("Summary:\nFine.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta")
            .fail_mid_stream("partial...", "connection dropped")
            .reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        // the partial text from the failed attempt never reaches the log
        assert!(session
            .messages
            .iter()
            .all(|m| !m.content.contains("partial")));
    }

    // Scenario E: concurrent sessions never cross-contaminate cost.
    #[tokio::test]
    async fn concurrent_sessions_keep_cost_separate() {
        let make = |input: u64, output: u64| {
            let alpha = ScriptedBackend::new("alpha")
                .reply_with_usage("Opening.", input, output)
                .reply_with_usage(AGREE, input, output)
                .reply_with_usage("Summary:\nOk.\n\nAction items:\n- none", input, output);
            let beta = ScriptedBackend::new("beta").reply_with_usage(AGREE, input, output);
            DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
                .with_options(fast_options())
        };

        let first = make(100, 50);
        let second = make(300, 70);

        let ((handle_a, _rx_a), (handle_b, _rx_b)) = tokio::join!(
            async { first.start("q", DebateStyle::Collaborative, None).await.unwrap() },
            async { second.start("q", DebateStyle::Collaborative, None).await.unwrap() },
        );
        let (session_a, session_b) = tokio::join!(handle_a.join(), handle_b.join());
        let session_a = session_a.unwrap();
        let session_b = session_b.unwrap();

        // 3 participant messages + 1 synthesis call each; alpha carries 3 of
        // the 4 calls in each session
        assert_eq!(session_a.cost.total_input_tokens, 400);
        assert_eq!(session_b.cost.total_input_tokens, 1200);
        assert_eq!(session_a.cost.total_output_tokens, 200);
        assert_eq!(session_b.cost.total_output_tokens, 280);
    }

    // Interjections consume a turn number but never change whose turn is next.
    #[tokio::test]
    async fn interjection_preserves_rotation() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("Opening.")
            .reply(AGREE)
            .reply("Summary:\nOk.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta")
            .reply_after("Counterpoint.", Duration::from_millis(150))
            .reply(AGREE);

        let store = Arc::new(InMemorySessionStore::new());
        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options())
            .with_store(store.clone());
        let (handle, mut rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        // interject while beta's delayed turn is in flight
        while let Some(event) = rx.recv().await {
            if matches!(event, DebateEvent::MessageAppended { .. }) {
                break;
            }
        }
        handle
            .interject(
                "Please consider operational cost too.",
                InterjectionKind::Redirect,
                None,
            )
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        assert_gapless_turns(&session);

        // the human message landed between beta's turn and alpha's next turn
        let authors: Vec<_> = session
            .messages
            .iter()
            .map(|m| match &m.author {
                MessageAuthor::Participant { id } => id.clone(),
                MessageAuthor::Human => "human".to_string(),
            })
            .collect();
        assert_eq!(authors, vec!["alpha", "beta", "human", "alpha", "beta"]);

        // rotation over participant messages is untouched by the interjection
        assert_eq!(
            participant_ids(&session),
            vec!["alpha", "beta", "alpha", "beta"]
        );

        // the save hook saw every appended message, human one included
        let saved = store.messages(session.id).await;
        assert_eq!(saved.len(), session.messages.len());
        assert!(saved.iter().any(|m| m.author == MessageAuthor::Human
            && m.interjection.as_ref().unwrap().kind == InterjectionKind::Redirect));
    }

    // Cancelling mid-turn leaves the log exactly as it was before the turn.
    #[tokio::test]
    async fn cancel_mid_turn_appends_nothing() {
        let alpha = ScriptedBackend::new("alpha").hang();
        let beta = ScriptedBackend::new("beta");

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, mut rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        while let Some(event) = rx.recv().await {
            if matches!(
                event,
                DebateEvent::StatusChanged {
                    status: DebateStatus::Debating,
                    ..
                }
            ) {
                break;
            }
        }
        handle.cancel();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Error);
        assert!(session.error_reason.unwrap().contains("cancelled"));
        assert!(session.messages.is_empty());
        assert!(session.cost.rows.is_empty());
    }

    // Synthesis failing twice errors the session but keeps the transcript.
    #[tokio::test]
    async fn synthesis_failure_preserves_transcript() {
        let alpha = ScriptedBackend::new("alpha")
            .reply(AGREE)
            .fail("synthesis down")
            .fail("still down");
        let beta = ScriptedBackend::new("beta").reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Error);
        assert!(session.error_reason.unwrap().contains("synthesis"));
        assert_eq!(session.messages.len(), 2);
        assert!(session.consensus.is_none());
    }

    // The max-turn cap forces synthesis even without agreement.
    #[tokio::test]
    async fn max_turns_forces_synthesis() {
        let alpha = ScriptedBackend::new("alpha")
            .reply("one")
            .reply("three")
            .reply("Summary:\nCapped.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta").reply("two").reply("four");

        let options = DebateOptions {
            max_turns: 4,
            ..fast_options()
        };
        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(options);
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.consensus.unwrap().summary, "Capped.");
    }

    // Chunks for a turn arrive before its MessageAppended, in order.
    #[tokio::test]
    async fn chunks_precede_append() {
        let alpha = ScriptedBackend::new("alpha")
            .reply(AGREE)
            .reply("Summary:\nOk.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta").reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options());
        let (handle, rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();
        handle.join().await.unwrap();

        let events = collect_events(rx).await;
        let mut seen_text_for_turn0 = false;
        for event in &events {
            match event {
                DebateEvent::Chunk {
                    turn: 0,
                    chunk: StreamChunk::Text(_),
                    ..
                } => seen_text_for_turn0 = true,
                DebateEvent::MessageAppended { message, .. } if message.turn == 0 => {
                    assert!(seen_text_for_turn0, "chunk must precede append");
                }
                _ => {}
            }
        }
    }

    // A failing store hook never corrupts or aborts the session.
    #[tokio::test]
    async fn store_failure_is_tolerated() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl SessionStore for FailingStore {
            async fn save_message(
                &self,
                _session_id: Uuid,
                _message: &DebateMessage,
            ) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }

            async fn save_session(&self, _session: &DebateSession) -> anyhow::Result<()> {
                anyhow::bail!("disk full")
            }
        }

        let alpha = ScriptedBackend::new("alpha")
            .reply(AGREE)
            .reply("Summary:\nOk.\n\nAction items:\n- none");
        let beta = ScriptedBackend::new("beta").reply(AGREE);

        let orchestrator = DebateOrchestrator::new(registry(vec![alpha, beta], &["alpha", "beta"]))
            .with_options(fast_options())
            .with_store(Arc::new(FailingStore));
        let (handle, _rx) = orchestrator
            .start("q", DebateStyle::Collaborative, None)
            .await
            .unwrap();

        let session = handle.join().await.unwrap();
        assert_eq!(session.status, DebateStatus::Complete);
        assert_eq!(session.messages.len(), 2);
    }

    #[test]
    fn turn_messages_frame_the_latest_counterpart() {
        let strategist = Participant {
            backend_id: "alpha".to_string(),
            role: DebateRole::Strategist,
            display_name: "Claude".to_string(),
            system_prompt: "system".to_string(),
        };
        let implementer = Participant {
            backend_id: "beta".to_string(),
            role: DebateRole::Implementer,
            display_name: "GPT".to_string(),
            system_prompt: "system".to_string(),
        };
        let participants = vec![strategist.clone(), implementer.clone()];

        let message = |author: MessageAuthor, turn: u32, content: &str| DebateMessage {
            id: Uuid::new_v4(),
            author,
            turn,
            content: content.to_string(),
            is_agreement: false,
            interjection: None,
            created_at: Utc::now(),
        };
        let transcript = vec![
            message(
                MessageAuthor::Participant {
                    id: "alpha".to_string(),
                },
                0,
                "use a queue",
            ),
            message(
                MessageAuthor::Participant {
                    id: "beta".to_string(),
                },
                1,
                "direct call is simpler",
            ),
        ];

        let messages =
            build_turn_messages(&strategist, &participants, "queue or call?", None, &transcript);

        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages[1].role, ChatRole::User);
        assert!(messages[1].content.contains("queue or call?"));
        // own prior message comes back as assistant
        assert_eq!(messages[2].role, ChatRole::Assistant);
        assert_eq!(messages[2].content, "use a queue");
        // the counterpart's latest message is reframed as context
        assert_eq!(messages[3].role, ChatRole::User);
        assert!(messages[3].content.contains("GPT"));
        assert!(messages[3].content.contains("direct call is simpler"));
        assert!(messages[3].content.contains("Continue the discussion"));
    }
}
