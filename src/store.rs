//! Session persistence hooks.
//!
//! Storage is a collaborator, not a core concern: the orchestrator calls the
//! hook after each appended message and after synthesis, and tolerates hook
//! failures without corrupting in-memory state. Embedders plug in their own
//! store; the engine ships a no-op default and an in-memory implementation
//! for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::debate::{DebateMessage, DebateSession};

/// Persistence hook trait - implemented by the hosting application.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Called once per appended message, participant and human alike.
    async fn save_message(&self, session_id: Uuid, message: &DebateMessage) -> anyhow::Result<()>;

    /// Called on every terminal transition and after synthesis.
    async fn save_session(&self, session: &DebateSession) -> anyhow::Result<()>;
}

/// Discards everything. The default when no store is configured.
pub struct NullSessionStore;

#[async_trait]
impl SessionStore for NullSessionStore {
    async fn save_message(&self, _session_id: Uuid, _message: &DebateMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn save_session(&self, _session: &DebateSession) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Non-persistent store for tests and simple embedders.
#[derive(Default)]
pub struct InMemorySessionStore {
    messages: RwLock<HashMap<Uuid, Vec<DebateMessage>>>,
    sessions: RwLock<HashMap<Uuid, DebateSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self, session_id: Uuid) -> Vec<DebateMessage> {
        self.messages
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn session(&self, session_id: Uuid) -> Option<DebateSession> {
        self.sessions.read().await.get(&session_id).cloned()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_message(&self, session_id: Uuid, message: &DebateMessage) -> anyhow::Result<()> {
        self.messages
            .write()
            .await
            .entry(session_id)
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn save_session(&self, session: &DebateSession) -> anyhow::Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostSnapshot;
    use crate::debate::{DebateStatus, MessageAuthor};
    use chrono::Utc;

    fn message(turn: u32) -> DebateMessage {
        DebateMessage {
            id: Uuid::new_v4(),
            author: MessageAuthor::Human,
            turn,
            content: format!("message {}", turn),
            is_agreement: false,
            interjection: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn in_memory_store_round_trip() {
        let store = InMemorySessionStore::new();
        let session_id = Uuid::new_v4();

        store.save_message(session_id, &message(0)).await.unwrap();
        store.save_message(session_id, &message(1)).await.unwrap();

        let saved = store.messages(session_id).await;
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].turn, 1);

        let session = DebateSession {
            id: session_id,
            question: "q".to_string(),
            participants: vec![],
            messages: saved,
            status: DebateStatus::Complete,
            cost: CostSnapshot::default(),
            consensus: None,
            error_reason: None,
            created_at: Utc::now(),
        };
        store.save_session(&session).await.unwrap();
        assert_eq!(
            store.session(session_id).await.unwrap().status,
            DebateStatus::Complete
        );
    }
}
