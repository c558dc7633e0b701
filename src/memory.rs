//! Per-conversation question/answer memory.
//!
//! Every conversation gets a [`SessionId`] and its own [`SessionMemory`].
//! A request takes the session's turn lock for its whole duration, so two
//! requests in the same conversation run one after the other and their
//! entries land in order. Different sessions share nothing.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use uuid::Uuid;

use crate::models::MemoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(SessionId)
            .map_err(|e| anyhow!("invalid session id '{}': {}", s, e))
    }
}

/// Append-only log of one conversation.
#[derive(Debug, Default)]
pub struct SessionMemory {
    entries: AsyncMutex<Vec<MemoryEntry>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of this conversation.
    pub async fn begin_turn(&self) -> Turn<'_> {
        Turn {
            entries: self.entries.lock().await,
        }
    }

    pub async fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().await.clone()
    }
}

/// Exclusive access to a session for the length of one request.
pub struct Turn<'a> {
    entries: MutexGuard<'a, Vec<MemoryEntry>>,
}

impl Turn<'_> {
    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    /// Prior exchanges as `Question: …\nAnswer: …` blocks, or `None` when
    /// the conversation is new.
    pub fn render(&self) -> Option<String> {
        render_entries(&self.entries)
    }

    pub fn record(&mut self, question: &str, answer: &str) {
        self.entries.push(MemoryEntry {
            question: question.to_string(),
            answer: answer.to_string(),
        });
    }
}

pub fn render_entries(entries: &[MemoryEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .map(|e| format!("Question: {}\nAnswer: {}", e.question, e.answer))
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// All live conversations of the process.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionId, Arc<SessionMemory>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh conversation.
    pub fn create(&self) -> (SessionId, Arc<SessionMemory>) {
        let id = SessionId::new();
        let memory = self.get_or_create(id);
        (id, memory)
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<SessionMemory>> {
        self.lock().get(&id).cloned()
    }

    pub fn get_or_create(&self, id: SessionId) -> Arc<SessionMemory> {
        self.lock().entry(id).or_default().clone()
    }

    /// Forget a conversation. Returns whether it existed.
    pub fn end(&self, id: SessionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SessionId, Arc<SessionMemory>>> {
        // The map is only touched in short non-panicking sections.
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_and_render() {
        let memory = SessionMemory::new();
        {
            let turn = memory.begin_turn().await;
            assert_eq!(turn.render(), None);
        }
        {
            let mut turn = memory.begin_turn().await;
            turn.record("What is RAG?", "Retrieval-augmented generation.");
            turn.record("Who coined it?", "Lewis et al.");
        }
        let turn = memory.begin_turn().await;
        assert_eq!(
            turn.render().unwrap(),
            "Question: What is RAG?\nAnswer: Retrieval-augmented generation.\n\n\
             Question: Who coined it?\nAnswer: Lewis et al."
        );
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = SessionStore::new();
        let (a, mem_a) = store.create();
        let (b, mem_b) = store.create();
        assert_ne!(a, b);

        mem_a.begin_turn().await.record("q-a", "a-a");
        assert_eq!(mem_a.entries().await.len(), 1);
        assert!(mem_b.entries().await.is_empty());

        // Same id resolves to the same log.
        assert_eq!(store.get_or_create(a).entries().await.len(), 1);
        assert!(store.end(b));
        assert!(store.get(b).is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_turns_keep_order() {
        let memory = Arc::new(SessionMemory::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let memory = memory.clone();
            handles.push(tokio::spawn(async move {
                let mut turn = memory.begin_turn().await;
                let before = turn.entries().len();
                tokio::task::yield_now().await;
                turn.record(&format!("q{}", i), &format!("seen {}", before));
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let entries = memory.entries().await;
        assert_eq!(entries.len(), 8);
        // Each turn saw exactly the entries recorded before it.
        for (n, entry) in entries.iter().enumerate() {
            assert_eq!(entry.answer, format!("seen {}", n));
        }
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
