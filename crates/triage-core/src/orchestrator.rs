//! Orchestrator: routes a turn to remote agents and streams back one
//! unified event sequence
//!
//! Dispatches run concurrently. Each sub-agent call is isolated: a failure
//! or timeout becomes an [`OrchestratorEvent::AgentFailure`] for that agent
//! while its siblings keep running.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::stream::{BoxStream, FuturesUnordered};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};
use triage_a2a::{AgentCard, Message, Reply};

use crate::error::{ConfigError, ProxyError, TurnError};
use crate::observer::{TurnMessage, TurnObserver};
use crate::proxy::RemoteAgentProxy;
use crate::routing::{AgentEntry, RoutingPolicy, RoutingRequest, system_instruction};

/// Proxies keyed by name, in registration order. Append-only while being
/// built, read-only once handed to an orchestrator.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    proxies: Vec<Arc<RemoteAgentProxy>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, proxy: RemoteAgentProxy) -> Result<(), ConfigError> {
        if self.get(proxy.name()).is_some() {
            return Err(ConfigError::DuplicateAgent(proxy.name().to_string()));
        }
        debug!(agent = %proxy.name(), "Registered remote agent");
        self.proxies.push(Arc::new(proxy));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RemoteAgentProxy>> {
        self.proxies.iter().find(|p| p.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<RemoteAgentProxy>> {
        self.proxies.iter()
    }

    pub fn entries(&self) -> Vec<AgentEntry> {
        self.proxies
            .iter()
            .map(|p| AgentEntry {
                name: p.name().to_string(),
                description: p.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

/// Resolution outcome for one agent
#[derive(Debug, Clone, Serialize)]
pub struct CardSummary {
    pub agent: String,
    pub card_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card: Option<AgentCard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    /// The orchestrator's own reasoning
    Token { text: String },
    /// Emitted once, on the first turn of a session
    AgentCards { cards: Vec<CardSummary> },
    AgentReply {
        agent: String,
        text: String,
        reply: Reply,
    },
    AgentFailure {
        agent: String,
        error: String,
        timeout: bool,
    },
    /// The routing policy itself failed; nothing was dispatched
    Error { message: String },
    Done { replies: usize, failures: usize },
}

pub struct Orchestrator {
    name: String,
    session_id: String,
    registry: AgentRegistry,
    policy: Arc<dyn RoutingPolicy>,
    observers: Vec<Arc<dyn TurnObserver>>,
    cards_reported: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        name: impl Into<String>,
        session_id: impl Into<String>,
        registry: AgentRegistry,
        policy: Arc<dyn RoutingPolicy>,
    ) -> Result<Self, TurnError> {
        if registry.is_empty() {
            return Err(TurnError::EmptyRegistry);
        }
        Ok(Self {
            name: name.into(),
            session_id: session_id.into(),
            registry,
            policy,
            observers: Vec::new(),
            cards_reported: AtomicBool::new(false),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        debug!("Adding turn observer: {}", observer.name());
        self.observers.push(observer);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn instruction(&self) -> String {
        system_instruction(&self.registry.entries(), chrono::Local::now().date_naive())
    }

    /// Resolve every agent concurrently and report each card or failure
    pub async fn agent_cards(&self) -> Vec<CardSummary> {
        let resolutions = self.registry.iter().map(|proxy| async move {
            let result = proxy.ensure_resolved().await;
            CardSummary {
                agent: proxy.name().to_string(),
                card_url: proxy.card_url(),
                card: result.as_ref().ok().map(|card| (*card).clone()),
                error: result.err().map(|e| e.to_string()),
            }
        });
        futures_util::future::join_all(resolutions).await
    }

    /// Run one turn. Fails up front, before any agent is contacted, when the
    /// prompt is empty.
    pub fn run_turn(
        self: &Arc<Self>,
        prompt: impl Into<String>,
    ) -> Result<BoxStream<'static, OrchestratorEvent>, TurnError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(TurnError::MissingField("prompt"));
        }
        let this = Arc::clone(self);
        Ok(Box::pin(this.turn(prompt)))
    }

    fn turn(self: Arc<Self>, prompt: String) -> impl Stream<Item = OrchestratorEvent> + Send + 'static {
        async_stream::stream! {
            info!(session_id = %self.session_id, "Turn started");
            self.notify_turn_start(&prompt).await;
            self.notify_message(&TurnMessage::user(&prompt)).await;

            if !self.cards_reported.swap(true, Ordering::SeqCst) {
                yield OrchestratorEvent::AgentCards { cards: self.agent_cards().await };
            }

            let request = RoutingRequest {
                session_id: self.session_id.clone(),
                prompt: prompt.clone(),
                agents: self.registry.entries(),
                instruction: self.instruction(),
            };
            let plan = match self.policy.plan(&request).await {
                Ok(plan) => plan,
                Err(e) => {
                    warn!(policy = self.policy.name(), "Routing failed: {:#}", e);
                    yield OrchestratorEvent::Error { message: format!("routing failed: {e:#}") };
                    yield OrchestratorEvent::Done { replies: 0, failures: 0 };
                    return;
                }
            };

            for text in plan.reasoning {
                yield OrchestratorEvent::Token { text };
            }

            let mut replies = 0;
            let mut failures = 0;
            let mut pending = FuturesUnordered::new();
            for dispatch in plan.dispatches {
                let Some(proxy) = self.registry.get(&dispatch.agent).cloned() else {
                    failures += 1;
                    yield OrchestratorEvent::AgentFailure {
                        agent: dispatch.agent.clone(),
                        error: format!("no agent named '{}' is registered", dispatch.agent),
                        timeout: false,
                    };
                    continue;
                };
                debug!(agent = %proxy.name(), "Dispatching");
                pending.push(async move {
                    let result = call_agent(&proxy, dispatch.task).await;
                    (proxy, result)
                });
            }

            while let Some((proxy, result)) = pending.next().await {
                let agent = proxy.name().to_string();
                let decoded = result.and_then(|reply| {
                    reply
                        .answer_text()
                        .map(|text| (text, reply))
                        .map_err(|e| ProxyError::Send { agent: agent.clone(), source: e.into() })
                });
                match decoded {
                    Ok((text, reply)) => {
                        replies += 1;
                        self.notify_message(&TurnMessage::agent(&agent, &text)).await;
                        yield OrchestratorEvent::AgentReply { agent, text, reply };
                    }
                    Err(e) => {
                        failures += 1;
                        warn!(agent = %agent, "Sub-agent failed: {}", e);
                        yield OrchestratorEvent::AgentFailure {
                            agent,
                            timeout: e.is_timeout(),
                            error: e.to_string(),
                        };
                    }
                }
            }

            info!(session_id = %self.session_id, replies, failures, "Turn finished");
            yield OrchestratorEvent::Done { replies, failures };
        }
    }

    async fn notify_turn_start(&self, prompt: &str) {
        for observer in &self.observers {
            if let Err(e) = observer.on_turn_start(&self.session_id, prompt).await {
                warn!(observer = observer.name(), "on_turn_start failed: {:#}", e);
            }
        }
    }

    async fn notify_message(&self, message: &TurnMessage) {
        for observer in &self.observers {
            if let Err(e) = observer.on_message_appended(&self.session_id, message).await {
                warn!(observer = observer.name(), "on_message_appended failed: {:#}", e);
            }
        }
    }
}

async fn call_agent(proxy: &RemoteAgentProxy, task: String) -> Result<Reply, ProxyError> {
    proxy.ensure_resolved().await?;
    proxy.send(Message::user(task)).await
}

/// One agent's answer in an aggregated turn
#[derive(Debug, Clone, Serialize)]
pub struct AgentAnswer {
    pub agent: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentFailureReport {
    pub agent: String,
    pub error: String,
    pub timeout: bool,
}

/// A whole turn folded into one value, for non-streaming callers
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnSummary {
    pub session_id: String,
    /// Concatenated orchestrator tokens
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_cards: Option<Vec<CardSummary>>,
    pub replies: Vec<AgentAnswer>,
    pub failures: Vec<AgentFailureReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnSummary {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..Self::default()
        }
    }

    pub fn absorb(&mut self, event: OrchestratorEvent) {
        match event {
            OrchestratorEvent::Token { text } => self.output.push_str(&text),
            OrchestratorEvent::AgentCards { cards } => self.agent_cards = Some(cards),
            OrchestratorEvent::AgentReply { agent, text, .. } => {
                self.replies.push(AgentAnswer { agent, text })
            }
            OrchestratorEvent::AgentFailure {
                agent,
                error,
                timeout,
            } => self.failures.push(AgentFailureReport {
                agent,
                error,
                timeout,
            }),
            OrchestratorEvent::Error { message } => self.error = Some(message),
            OrchestratorEvent::Done { .. } => {}
        }
    }

    pub async fn collect(
        session_id: impl Into<String>,
        mut events: BoxStream<'static, OrchestratorEvent>,
    ) -> Self {
        let mut summary = Self::new(session_id);
        while let Some(event) = events.next().await {
            summary.absorb(event);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentEndpointConfig;
    use crate::proxy::ProxyContext;
    use crate::routing::{Dispatch, RoutingPlan};
    use crate::secrets::MemorySecretStore;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use triage_a2a::ClientCredentialsProvider;

    fn proxy(name: &str) -> RemoteAgentProxy {
        let config = AgentEndpointConfig {
            name: name.to_string(),
            description: format!("{name} description"),
            region: String::new(),
            runtime_arn: String::new(),
            secret_path: format!("/app/{name}"),
            keywords: Vec::new(),
            endpoint_url: Some("http://127.0.0.1:1/".to_string()),
        };
        let context = ProxyContext::new(
            "s-1",
            Arc::new(MemorySecretStore::new()),
            Arc::new(ClientCredentialsProvider::new()),
        );
        RemoteAgentProxy::new(config, context)
    }

    fn registry() -> AgentRegistry {
        let mut registry = AgentRegistry::new();
        registry.register(proxy("Monitoring_Agent")).unwrap();
        registry.register(proxy("OpsRemediation_Agent")).unwrap();
        registry
    }

    struct ToAll;

    #[async_trait]
    impl RoutingPolicy for ToAll {
        fn name(&self) -> &str {
            "to_all"
        }

        async fn plan(&self, request: &RoutingRequest) -> Result<RoutingPlan> {
            Ok(RoutingPlan {
                reasoning: vec!["Asking everyone.\n".to_string()],
                dispatches: request
                    .agents
                    .iter()
                    .map(|a| Dispatch {
                        agent: a.name.clone(),
                        task: request.prompt.clone(),
                    })
                    .collect(),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl RoutingPolicy for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn plan(&self, _request: &RoutingRequest) -> Result<RoutingPlan> {
            bail!("model unavailable")
        }
    }

    struct FailingObserver;

    #[async_trait]
    impl TurnObserver for FailingObserver {
        fn name(&self) -> &str {
            "failing"
        }

        async fn on_turn_start(&self, _session_id: &str, _prompt: &str) -> Result<()> {
            bail!("memory store down")
        }
    }

    fn orchestrator(policy: Arc<dyn RoutingPolicy>) -> Arc<Orchestrator> {
        Arc::new(Orchestrator::new("Host_Agent", "s-1", registry(), policy).unwrap())
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = registry();
        assert!(matches!(
            registry.register(proxy("Monitoring_Agent")),
            Err(ConfigError::DuplicateAgent(name)) if name == "Monitoring_Agent"
        ));
        let names: Vec<String> = registry.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Monitoring_Agent", "OpsRemediation_Agent"]);
    }

    #[test]
    fn test_empty_registry_rejected() {
        let result = Orchestrator::new("Host_Agent", "s-1", AgentRegistry::new(), Arc::new(ToAll));
        assert!(matches!(result, Err(TurnError::EmptyRegistry)));
    }

    #[test]
    fn test_blank_prompt_rejected() {
        let orchestrator = orchestrator(Arc::new(ToAll));
        assert!(matches!(
            orchestrator.run_turn("   "),
            Err(TurnError::MissingField("prompt"))
        ));
    }

    #[test]
    fn test_instruction_lists_registry() {
        let text = orchestrator(Arc::new(ToAll)).instruction();
        assert!(text.contains("- Monitoring_Agent: Monitoring_Agent description"));
        assert!(text.contains("Today's Date (YYYY-MM-DD): "));
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_cards_reported_once() {
        let orchestrator = orchestrator(Arc::new(ToAll));

        let first: Vec<OrchestratorEvent> = orchestrator.run_turn("status?").unwrap().collect().await;
        match &first[0] {
            OrchestratorEvent::AgentCards { cards } => {
                assert_eq!(cards.len(), 2);
                assert!(cards.iter().all(|c| c.card.is_none() && c.error.is_some()));
            }
            other => panic!("expected agent cards, got {:?}", other),
        }
        assert!(matches!(
            first.last(),
            Some(OrchestratorEvent::Done { replies: 0, failures: 2 })
        ));

        let second: Vec<OrchestratorEvent> = orchestrator.run_turn("again").unwrap().collect().await;
        assert!(!second.iter().any(|e| matches!(e, OrchestratorEvent::AgentCards { .. })));
        let failed = second
            .iter()
            .filter(|e| matches!(e, OrchestratorEvent::AgentFailure { timeout: false, .. }))
            .count();
        assert_eq!(failed, 2);
    }

    #[tokio::test]
    async fn test_routing_failure_ends_turn() {
        let orchestrator = orchestrator(Arc::new(Broken));
        let events: Vec<OrchestratorEvent> = orchestrator.run_turn("hi").unwrap().collect().await;
        let summary = TurnSummary::collect("s-1", Box::pin(futures_util::stream::iter(events))).await;
        assert!(summary.error.unwrap().contains("model unavailable"));
        assert!(summary.replies.is_empty());
        assert!(summary.failures.is_empty());
    }

    #[tokio::test]
    async fn test_observer_failure_does_not_fail_turn() {
        let orchestrator = Arc::new(
            Orchestrator::new("Host_Agent", "s-1", registry(), Arc::new(ToAll))
                .unwrap()
                .with_observer(Arc::new(FailingObserver)),
        );
        let events: Vec<OrchestratorEvent> = orchestrator.run_turn("hi").unwrap().collect().await;
        assert!(matches!(events.last(), Some(OrchestratorEvent::Done { .. })));
    }

    #[test]
    fn test_summary_folds_events() {
        let mut summary = TurnSummary::new("s-1");
        summary.absorb(OrchestratorEvent::Token { text: "Routing. ".to_string() });
        summary.absorb(OrchestratorEvent::Token { text: "Done.".to_string() });
        summary.absorb(OrchestratorEvent::AgentReply {
            agent: "Monitoring_Agent".to_string(),
            text: "ok".to_string(),
            reply: Reply::Message(Message::agent("ok")),
        });
        summary.absorb(OrchestratorEvent::AgentFailure {
            agent: "OpsRemediation_Agent".to_string(),
            error: "boom".to_string(),
            timeout: true,
        });
        summary.absorb(OrchestratorEvent::Done { replies: 1, failures: 1 });

        assert_eq!(summary.output, "Routing. Done.");
        assert_eq!(summary.replies[0].text, "ok");
        assert!(summary.failures[0].timeout);

        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("agent_cards").is_none());
        assert!(value.get("error").is_none());
    }
}
