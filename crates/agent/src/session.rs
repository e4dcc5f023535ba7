//! One conversation shared by every front end that talks to the agent.
//!
//! A turn holds the session lock from reading the prior state until the new
//! state has been persisted, so concurrent turns run one after another and
//! the state file always holds the result of exactly one completed turn.

use std::sync::atomic::{AtomicBool, Ordering};

use chromepilot_core::Result;
use chromepilot_storage::StateStore;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::runtime::{Agent, AgentEvent, RunState};

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub output: String,
    /// Whether the new state reached disk.
    pub saved: bool,
    pub tool_calls: usize,
}

pub struct SharedSession {
    agent: Agent,
    store: StateStore,
    state: Mutex<Option<RunState>>,
    /// Readable without waiting for an in-flight turn.
    has_state: AtomicBool,
}

impl SharedSession {
    /// Build the session, restoring any prior state from `store`.
    pub async fn open(agent: Agent, store: StateStore) -> Self {
        let state = store.load::<RunState>().await;
        if let Some(s) = &state {
            info!(path = %store.path().display(), messages = s.messages.len(), "Resuming conversation");
        }
        Self {
            agent,
            store,
            has_state: AtomicBool::new(state.is_some()),
            state: Mutex::new(state),
        }
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    pub fn max_turns(&self) -> u32 {
        self.agent.max_turns()
    }

    pub fn has_state(&self) -> bool {
        self.has_state.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<RunState> {
        self.state.lock().await.clone()
    }

    /// Run one request. On failure the previous state is kept untouched.
    pub async fn run_turn(&self, text: &str, events: Option<&UnboundedSender<AgentEvent>>) -> Result<TurnOutcome> {
        let mut guard = self.state.lock().await;

        let result = self.agent.run(text, guard.clone(), events).await?;

        let saved = self.store.save(&result.state).await;
        if !saved {
            warn!(path = %self.store.path().display(), "Continuing with unsaved state");
        }
        *guard = Some(result.state);
        self.has_state.store(true, Ordering::SeqCst);

        Ok(TurnOutcome {
            output: result.final_output,
            saved,
            tool_calls: result.tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::{text, ScriptedProvider};
    use async_trait::async_trait;
    use chromepilot_core::types::{ChatMessage, LLMResponse};
    use chromepilot_core::Error;
    use chromepilot_providers::Provider;
    use chromepilot_tools::ToolRegistry;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Replies `echo: <last user text>` after a short delay.
    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        async fn chat(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let last = messages.iter().rev().find(|m| m.role == "user").map(|m| m.text()).unwrap_or_default();
            Ok(LLMResponse {
                content: Some(format!("echo: {}", last)),
                finish_reason: "stop".to_string(),
                ..Default::default()
            })
        }
    }

    fn store(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("state.json"))
    }

    #[tokio::test]
    async fn test_turn_persists_and_resumes() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new(vec![text("one")]);
        let session = SharedSession::open(Agent::new(provider, ToolRegistry::new()), store(&dir)).await;
        assert!(!session.has_state());

        let outcome = session.run_turn("hello", None).await.unwrap();
        assert_eq!(outcome.output, "one");
        assert!(outcome.saved);
        assert!(session.has_state());

        // A new process picks up where the last one stopped.
        let provider = ScriptedProvider::new(vec![text("two")]);
        let resumed = SharedSession::open(Agent::new(provider.clone(), ToolRegistry::new()), store(&dir)).await;
        assert!(resumed.has_state());
        resumed.run_turn("again", None).await.unwrap();
        let seen = provider.seen.lock().unwrap();
        let texts: Vec<_> = seen[0].iter().skip(1).map(|m| m.text()).collect();
        assert_eq!(texts, vec!["hello", "one", "again"]);
    }

    #[tokio::test]
    async fn test_failed_turn_keeps_prior_state() {
        let dir = TempDir::new().unwrap();
        let provider = ScriptedProvider::new(vec![text("ok"), Err(Error::Provider("down".to_string()))]);
        let agent = Agent::new(provider, ToolRegistry::new()).with_retry(0, 1);
        let session = SharedSession::open(agent, store(&dir)).await;

        session.run_turn("first", None).await.unwrap();
        let before = session.snapshot().await;
        assert!(session.run_turn("second", None).await.is_err());
        assert_eq!(session.snapshot().await, before);
        assert_eq!(store(&dir).load::<RunState>().await, before);
    }

    #[tokio::test]
    async fn test_unsaved_state_still_answers() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let provider = ScriptedProvider::new(vec![text("fine")]);
        let session = SharedSession::open(
            Agent::new(provider, ToolRegistry::new()),
            StateStore::new(blocker.join("state.json")),
        )
        .await;

        let outcome = session.run_turn("hi", None).await.unwrap();
        assert_eq!(outcome.output, "fine");
        assert!(!outcome.saved);
        assert!(session.has_state());
    }

    #[tokio::test]
    async fn test_concurrent_turns_do_not_tear_state() {
        let dir = TempDir::new().unwrap();
        let session = Arc::new(
            SharedSession::open(Agent::new(Arc::new(EchoProvider), ToolRegistry::new()), store(&dir)).await,
        );

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.run_turn(&format!("msg {}", i), None).await })
            })
            .collect();
        for h in handles {
            let outcome = h.await.unwrap().unwrap();
            assert!(outcome.output.starts_with("echo: msg "));
        }

        let persisted: RunState = store(&dir).load().await.unwrap();
        assert_eq!(Some(persisted.clone()), session.snapshot().await);

        // Every request landed exactly once, each followed by its own reply.
        assert_eq!(persisted.messages.len(), 16);
        for pair in persisted.messages.chunks(2) {
            assert_eq!(pair[0].role, "user");
            assert_eq!(pair[1].text(), format!("echo: {}", pair[0].text()));
        }
        let mut users: Vec<_> = persisted.messages.iter().step_by(2).map(|m| m.text().to_string()).collect();
        users.sort();
        let mut expected: Vec<_> = (0..8).map(|i| format!("msg {}", i)).collect();
        expected.sort();
        assert_eq!(users, expected);
    }
}
