//! # Colloquy
//!
//! Debate orchestration engine for heterogeneous LLM backends.
//!
//! Two or more independent model backends hold a structured, turn-based
//! discussion over a user's question, converge on a joint answer, and report
//! accrued API cost. The human driving the session can interject mid-debate,
//! force an early synthesis, or cancel outright.
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │        DebateOrchestrator        │
//!        │   (turn loop + state machine)    │
//!        └──────┬─────────────┬─────────────┘
//!               │             │
//!               ▼             ▼
//!      ┌────────────────┐  ┌────────────────┐
//!      │ BackendRegistry│  │ CostAggregator │
//!      │ (per-vendor    │  │ (per-session   │
//!      │  adapters)     │  │  accounting)   │
//!      └────────────────┘  └────────────────┘
//! ```
//!
//! ## Session Flow
//! 1. `start` resolves the default roster and builds one participant per backend
//! 2. Participants alternate turns; each turn streams through its adapter
//! 3. Chunks, appended messages, and cost updates flow out as [`DebateEvent`]s
//! 4. Consecutive mutual agreement (or a human override) triggers synthesis
//! 5. The synthesized [`Consensus`] and final cost snapshot close the session
//!
//! ## Modules
//! - `backend`: uniform adapter contract over vendor model APIs, plus the registry
//! - `debate`: session state machine, turn loop, agreement detection, synthesis
//! - `cost`: token-usage accounting and pricing math
//! - `persona`: role prompts and inter-turn context framing
//! - `store`: persistence hook trait for embedders

pub mod backend;
pub mod config;
pub mod cost;
pub mod debate;
pub mod persona;
pub mod store;

pub use backend::{
    BackendDescriptor, BackendError, BackendRegistry, ChatMessage, ChatRole, ChunkStream,
    FinishReason, GenerateOptions, GenerateRequest, Generation, ModelBackend, Pricing,
    StreamChunk, TokenUsage,
};
pub use config::Config;
pub use cost::{BackendCost, CostAggregator, CostSnapshot};
pub use debate::{
    Consensus, DebateError, DebateEvent, DebateHandle, DebateMessage, DebateOptions,
    DebateOrchestrator, DebateSession, DebateStatus, InterjectionKind, MessageAuthor, Participant,
};
pub use persona::{DebateRole, DebateStyle};
pub use store::{InMemorySessionStore, NullSessionStore, SessionStore};
