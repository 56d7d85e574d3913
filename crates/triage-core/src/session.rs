//! Sessions and the host runtime
//!
//! Each caller-supplied session id gets its own [`Session`], which owns an
//! orchestrator and through it every proxy, token and bound client fetched
//! under that id. Sessions are created on first sight and reused afterwards.
//! At capacity the least recently active session is evicted to make room.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use triage_a2a::{ClientConfig, ClientCredentialsProvider, CredentialProvider, Message, Reply};

use crate::config::HostConfig;
use crate::error::TurnError;
use crate::observer::{RecentTurnsObserver, TurnObserver};
use crate::orchestrator::{AgentRegistry, Orchestrator, OrchestratorEvent, TurnSummary};
use crate::proxy::{ProxyContext, RemoteAgentProxy};
use crate::routing::{KeywordRouter, RoutingPolicy};
use crate::secrets::{self, SecretStore};

const MAX_SESSION_ID_LEN: usize = 256;

pub const MAX_SESSIONS: usize = 1000;

/// A turn request as received from a caller
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvocationRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl InvocationRequest {
    pub fn new(prompt: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            session_id: Some(session_id.into()),
        }
    }

    /// Caller-input checks; both run before anything else happens
    pub fn validate(&self) -> Result<(&str, &str), TurnError> {
        let prompt = self
            .prompt
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .ok_or(TurnError::MissingField("prompt"))?;
        let session_id = self
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(TurnError::MissingSession)?;
        Ok((prompt, session_id))
    }
}

fn check_session_id(id: &str) -> Result<(), TurnError> {
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(TurnError::Setup("session id too long".to_string()));
    }
    if id.chars().any(|c| c.is_control()) {
        return Err(TurnError::Setup(
            "session id contains control characters".to_string(),
        ));
    }
    Ok(())
}

pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    orchestrator: Arc<Orchestrator>,
    turns: AtomicU64,
    /// Unix millis of the last lookup
    last_activity: AtomicI64,
    /// Manager-wide activity sequence number; lowest is evicted first
    last_seen: AtomicU64,
}

impl Session {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn turn_count(&self) -> u64 {
        self.turns.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.last_activity.load(Ordering::Relaxed))
            .unwrap_or(self.created_at)
    }

    fn record_activity(&self, seq: u64) {
        self.last_activity
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.last_seen.store(seq, Ordering::Relaxed);
    }

    pub fn run_turn(&self, prompt: &str) -> Result<BoxStream<'static, OrchestratorEvent>, TurnError> {
        let stream = self.orchestrator.run_turn(prompt)?;
        self.turns.fetch_add(1, Ordering::Relaxed);
        Ok(stream)
    }

    /// Send one message straight to a named agent, bypassing routing
    pub async fn send_direct(&self, agent: &str, text: &str) -> anyhow::Result<Reply> {
        let proxy = self
            .orchestrator
            .registry()
            .get(agent)
            .ok_or_else(|| anyhow!("no agent named '{}' is configured", agent))?;
        proxy.ensure_resolved().await?;
        let reply = proxy
            .send(Message::user(text))
            .await
            .with_context(|| format!("sending to {agent}"))?;
        Ok(reply)
    }
}

/// Live sessions keyed by id
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    capacity: usize,
    seq: AtomicU64,
}

/// Result of [`SessionManager::get_or_create`]
pub struct Admission {
    pub session: Arc<Session>,
    /// Session dropped to make room, if any
    pub evicted: Option<Arc<Session>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a session and mark it active
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        session.record_activity(self.next_seq());
        Some(session)
    }

    /// Existing session for `id`, or a new one around `build()`
    pub async fn get_or_create<F>(&self, id: &str, build: F) -> Result<Admission, TurnError>
    where
        F: FnOnce() -> Result<Orchestrator, TurnError>,
    {
        if let Some(session) = self.get(id).await {
            return Ok(Admission {
                session,
                evicted: None,
            });
        }
        check_session_id(id)?;

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(id) {
            session.record_activity(self.next_seq());
            return Ok(Admission {
                session: session.clone(),
                evicted: None,
            });
        }

        let orchestrator = Arc::new(build()?);
        let evicted = if sessions.len() >= self.capacity {
            let idle = sessions
                .values()
                .min_by_key(|s| s.last_seen.load(Ordering::Relaxed))
                .map(|s| s.id.clone());
            idle.and_then(|idle| sessions.remove(&idle))
        } else {
            None
        };
        if let Some(old) = &evicted {
            warn!(
                session_id = %old.id,
                last_activity = %old.last_activity(),
                "Session limit reached, evicted least recently active session"
            );
        }

        let now = Utc::now();
        let session = Arc::new(Session {
            id: id.to_string(),
            created_at: now,
            orchestrator,
            turns: AtomicU64::new(0),
            last_activity: AtomicI64::new(now.timestamp_millis()),
            last_seen: AtomicU64::new(self.next_seq()),
        });
        sessions.insert(id.to_string(), session.clone());
        info!(session_id = %id, "Created session");
        Ok(Admission { session, evicted })
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Everything needed to serve turns: configuration, collaborators, sessions
pub struct HostRuntime {
    config: HostConfig,
    secrets: Arc<dyn SecretStore>,
    credentials: Arc<dyn CredentialProvider>,
    policy: Arc<dyn RoutingPolicy>,
    recent_turns: Arc<RecentTurnsObserver>,
    observers: Vec<Arc<dyn TurnObserver>>,
    sessions: SessionManager,
}

impl HostRuntime {
    pub fn new(
        config: HostConfig,
        secrets: Arc<dyn SecretStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let policy = config.agents.iter().fold(KeywordRouter::new(), |router, agent| {
            router.with_agent(agent.name.clone(), &agent.keywords)
        });
        let recent_turns = Arc::new(RecentTurnsObserver::new(config.host.recent_turns));
        Self {
            secrets,
            credentials,
            policy: Arc::new(policy),
            observers: vec![recent_turns.clone() as Arc<dyn TurnObserver>],
            recent_turns,
            sessions: SessionManager::new(),
            config,
        }
    }

    /// Secret store and token provider built from the config itself
    pub fn from_config(config: HostConfig) -> Self {
        let secrets = secrets::from_config(&config.secrets);
        let credentials =
            Arc::new(ClientCredentialsProvider::new().with_timeout(config.host.token_timeout()));
        Self::new(config, secrets, credentials)
    }

    pub fn with_policy(mut self, policy: Arc<dyn RoutingPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn recent_turns(&self) -> &RecentTurnsObserver {
        &self.recent_turns
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// A fresh orchestrator whose proxies belong to `session_id`
    pub fn build_orchestrator(&self, session_id: &str) -> Result<Orchestrator, TurnError> {
        let context = ProxyContext::new(session_id, self.secrets.clone(), self.credentials.clone())
            .with_client_config(ClientConfig {
                streaming: self.config.host.streaming,
                timeout: self.config.host.call_timeout(),
                ..ClientConfig::default()
            });

        let mut registry = AgentRegistry::new();
        for agent in &self.config.agents {
            registry
                .register(RemoteAgentProxy::new(agent.clone(), context.clone()))
                .map_err(|e| TurnError::Setup(e.to_string()))?;
        }

        let orchestrator = self.observers.iter().fold(
            Orchestrator::new(&self.config.host.name, session_id, registry, self.policy.clone())?,
            |orchestrator, observer| orchestrator.with_observer(observer.clone()),
        );
        debug!(session_id, agents = self.config.agents.len(), "Built orchestrator");
        Ok(orchestrator)
    }

    pub async fn session(&self, session_id: &str) -> Result<Arc<Session>, TurnError> {
        let admission = self
            .sessions
            .get_or_create(session_id, || self.build_orchestrator(session_id))
            .await?;
        if let Some(old) = admission.evicted {
            self.recent_turns.forget(old.id()).await;
        }
        Ok(admission.session)
    }

    /// Validate the request, then start a streamed turn
    pub async fn handle(
        &self,
        request: &InvocationRequest,
    ) -> Result<BoxStream<'static, OrchestratorEvent>, TurnError> {
        let (prompt, session_id) = request.validate()?;
        let session = self.session(session_id).await?;
        session.run_turn(prompt)
    }

    /// Same as [`handle`](Self::handle), folded into one summary
    pub async fn handle_aggregated(&self, request: &InvocationRequest) -> Result<TurnSummary, TurnError> {
        let (_, session_id) = request.validate()?;
        let session_id = session_id.to_string();
        let events = self.handle(request).await?;
        Ok(TurnSummary::collect(session_id, events).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::MemorySecretStore;

    fn runtime() -> HostRuntime {
        let config = HostConfig::from_yaml(
            r#"
agents:
  - name: Monitoring_Agent
    description: CloudWatch
    secret_path: /m
    endpoint_url: http://127.0.0.1:1/
    keywords: [cloudwatch]
"#,
        )
        .unwrap();
        HostRuntime::new(
            config,
            Arc::new(MemorySecretStore::new()),
            Arc::new(ClientCredentialsProvider::new()),
        )
    }

    #[test]
    fn test_validate_prompt_before_session() {
        let request = InvocationRequest::default();
        assert!(matches!(request.validate(), Err(TurnError::MissingField("prompt"))));

        let request = InvocationRequest {
            prompt: Some("hi".to_string()),
            session_id: Some("  ".to_string()),
        };
        assert!(matches!(request.validate(), Err(TurnError::MissingSession)));
    }

    #[tokio::test]
    async fn test_missing_prompt_creates_no_session() {
        let rt = runtime();
        let request = InvocationRequest {
            prompt: None,
            session_id: Some("s-1".to_string()),
        };
        assert!(matches!(
            rt.handle(&request).await,
            Err(TurnError::MissingField("prompt"))
        ));
        assert_eq!(rt.sessions().count().await, 0);
    }

    #[tokio::test]
    async fn test_sessions_are_reused() {
        let rt = runtime();
        let a = rt.session("s-1").await.unwrap();
        let b = rt.session("s-1").await.unwrap();
        let c = rt.session("s-2").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.orchestrator().session_id(), "s-1");
        assert_eq!(rt.sessions().count().await, 2);
    }

    #[tokio::test]
    async fn test_rejects_control_characters() {
        let rt = runtime();
        assert!(matches!(
            rt.session("bad\nid").await,
            Err(TurnError::Setup(_))
        ));
    }

    #[tokio::test]
    async fn test_full_manager_evicts_least_recently_active() {
        let rt = runtime();
        for i in 0..MAX_SESSIONS {
            rt.session(&format!("op-{i}")).await.unwrap();
        }
        rt.recent_turns().on_turn_start("op-1", "check alarms").await.unwrap();
        // op-0 is the oldest but was just used again
        rt.session("op-0").await.unwrap();

        let fresh = rt.session("fresh-operator").await.unwrap();
        assert_eq!(fresh.id(), "fresh-operator");
        assert_eq!(rt.sessions().count().await, MAX_SESSIONS);
        assert!(rt.sessions().get("op-0").await.is_some());
        assert!(rt.sessions().get("op-1").await.is_none());
        assert!(rt.recent_turns().recent("op-1").await.is_empty());
    }

    #[tokio::test]
    async fn test_evicted_session_starts_over() {
        let manager = SessionManager::with_capacity(2);
        let build = || runtime().build_orchestrator("x");
        let first = manager.get_or_create("a", build).await.unwrap();
        assert!(first.evicted.is_none());
        manager.get_or_create("b", build).await.unwrap();

        let admitted = manager.get_or_create("c", build).await.unwrap();
        let evicted = admitted.evicted.unwrap();
        assert!(Arc::ptr_eq(&evicted, &first.session));
        assert!(evicted.last_activity() <= admitted.session.last_activity());

        let again = manager.get_or_create("a", build).await.unwrap();
        assert!(!Arc::ptr_eq(&again.session, &first.session));
        assert_eq!(again.evicted.unwrap().id(), "b");
    }

    #[tokio::test]
    async fn test_direct_send_unknown_agent() {
        let rt = runtime();
        let session = rt.session("s-1").await.unwrap();
        let err = session.send_direct("Nobody", "hi").await.unwrap_err();
        assert!(err.to_string().contains("Nobody"));
    }
}
