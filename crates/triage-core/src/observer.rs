//! Turn observers: memory and other side effects hang off these hooks
//!
//! Both hooks default to no-ops, so an observer only implements what it
//! needs. Observer failures are logged by the orchestrator and never fail
//! the turn.

use std::collections::{HashMap, VecDeque};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use triage_a2a::Role;

/// A message recorded during a turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnMessage {
    pub role: Role,
    /// `user`, or the name of the agent that replied
    pub author: String,
    pub text: String,
}

impl TurnMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            author: "user".to_string(),
            text: text.into(),
        }
    }

    pub fn agent(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            author: name.into(),
            text: text.into(),
        }
    }
}

#[async_trait]
pub trait TurnObserver: Send + Sync {
    fn name(&self) -> &str;

    async fn on_turn_start(&self, _session_id: &str, _prompt: &str) -> Result<()> {
        Ok(())
    }

    async fn on_message_appended(&self, _session_id: &str, _message: &TurnMessage) -> Result<()> {
        Ok(())
    }
}

/// One recorded turn
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub started_at: DateTime<Utc>,
    pub prompt: String,
    pub messages: Vec<TurnMessage>,
}

/// Keeps the last `capacity` turns of every session in memory
pub struct RecentTurnsObserver {
    capacity: usize,
    sessions: RwLock<HashMap<String, VecDeque<Turn>>>,
}

impl RecentTurnsObserver {
    pub const DEFAULT_CAPACITY: usize = 5;

    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Oldest first
    pub async fn recent(&self, session_id: &str) -> Vec<Turn> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop everything kept for `session_id`
    pub async fn forget(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }
}

impl Default for RecentTurnsObserver {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl TurnObserver for RecentTurnsObserver {
    fn name(&self) -> &str {
        "recent_turns"
    }

    async fn on_turn_start(&self, session_id: &str, prompt: &str) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push_back(Turn {
            started_at: Utc::now(),
            prompt: prompt.to_string(),
            messages: Vec::new(),
        });
        while turns.len() > self.capacity {
            turns.pop_front();
        }
        debug!(session_id, turns = turns.len(), "Recorded turn start");
        Ok(())
    }

    async fn on_message_appended(&self, session_id: &str, message: &TurnMessage) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        if let Some(turn) = sessions.get_mut(session_id).and_then(|t| t.back_mut()) {
            turn.messages.push(message.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Silent;

    #[async_trait]
    impl TurnObserver for Silent {
        fn name(&self) -> &str {
            "silent"
        }
    }

    #[tokio::test]
    async fn test_default_hooks_are_noops() {
        let observer = Silent;
        observer.on_turn_start("s", "hello").await.unwrap();
        observer
            .on_message_appended("s", &TurnMessage::user("hello"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_keeps_last_k_turns() {
        let observer = RecentTurnsObserver::new(2);
        for prompt in ["one", "two", "three"] {
            observer.on_turn_start("s1", prompt).await.unwrap();
            observer
                .on_message_appended("s1", &TurnMessage::agent("Monitoring_Agent", format!("re {prompt}")))
                .await
                .unwrap();
        }
        let turns = observer.recent("s1").await;
        let prompts: Vec<&str> = turns.iter().map(|t| t.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["two", "three"]);
        assert_eq!(turns[1].messages[0].text, "re three");
        assert_eq!(turns[1].messages[0].author, "Monitoring_Agent");
    }

    #[tokio::test]
    async fn test_sessions_are_separate() {
        let observer = RecentTurnsObserver::default();
        observer.on_turn_start("a", "for a").await.unwrap();
        observer.on_turn_start("b", "for b").await.unwrap();
        observer
            .on_message_appended("b", &TurnMessage::user("for b"))
            .await
            .unwrap();
        assert_eq!(observer.recent("a").await[0].messages.len(), 0);
        assert_eq!(observer.recent("b").await[0].messages.len(), 1);
        assert!(observer.recent("c").await.is_empty());

        assert!(observer.forget("a").await);
        assert!(!observer.forget("a").await);
        assert!(observer.recent("a").await.is_empty());
        assert_eq!(observer.recent("b").await.len(), 1);
    }
}
