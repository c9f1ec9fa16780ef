//! Session-scoped events streamed to the hosting layer.
//!
//! The hosting application subscribes to these instead of polling session
//! state; every event carries the session id and, where relevant, the message
//! id external subsystems (voting, persistence) key off.

use uuid::Uuid;

use crate::backend::StreamChunk;
use crate::cost::CostSnapshot;

use super::{Consensus, DebateMessage, DebateStatus, MessageAuthor};

/// Events emitted by a running debate session.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    /// The session moved to a new lifecycle phase.
    StatusChanged {
        session_id: Uuid,
        status: DebateStatus,
    },
    /// Incremental output from the turn currently in flight, in arrival order.
    Chunk {
        session_id: Uuid,
        author: MessageAuthor,
        turn: u32,
        chunk: StreamChunk,
    },
    /// A completed message was appended to the transcript.
    MessageAppended {
        session_id: Uuid,
        message: DebateMessage,
    },
    /// Usage was recorded for a turn; snapshot totals never decrease.
    CostUpdated {
        session_id: Uuid,
        snapshot: CostSnapshot,
    },
    /// Synthesis finished and the session is complete.
    Completed {
        session_id: Uuid,
        consensus: Consensus,
        cost: CostSnapshot,
    },
    /// The session ended in error; transcript and cost remain inspectable.
    Errored { session_id: Uuid, reason: String },
}
