//! Routing policies: decide which remote agents handle a turn
//!
//! A policy sees the registry as `{name, description}` entries in
//! registration order plus the rendered orchestrator instruction. It returns
//! its reasoning (streamed to the caller as orchestrator tokens) and the
//! dispatches to make. LLM-backed dispatchers implement the same trait.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

/// A registry entry as a policy sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentEntry {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct RoutingRequest {
    pub session_id: String,
    pub prompt: String,
    /// Registration order
    pub agents: Vec<AgentEntry>,
    pub instruction: String,
}

/// Forward `task` to the agent called `agent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatch {
    pub agent: String,
    pub task: String,
}

#[derive(Debug, Clone, Default)]
pub struct RoutingPlan {
    pub reasoning: Vec<String>,
    pub dispatches: Vec<Dispatch>,
}

#[async_trait]
pub trait RoutingPolicy: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(&self, request: &RoutingRequest) -> Result<RoutingPlan>;
}

/// Instruction text for the lead orchestrator
pub fn system_instruction(agents: &[AgentEntry], today: NaiveDate) -> String {
    let roster = agents
        .iter()
        .map(|a| format!("- {}: {}", a.name, a.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Role: You are the lead orchestrator for incident response and operations. \
Route each request to the specialist agents best suited to it, follow their progress \
and report back clearly.

Specialist agents:

{roster}

Directives:
1. Work out the objective and scope first (account, region, service, time window, urgency).
2. Send each agent an explicit task and always address it by its exact name.
3. Correlate the findings of every agent you contacted: root cause, evidence, proposed actions.
4. When monitoring finds an issue, make sure a ticket exists and report its id and status.
5. Propose remediation and its impact, and wait for confirmation unless a runbook is pre-approved.
6. Report only what agents and tools confirmed. Never invent results.
7. Keep answers short: bullet points and brief sections.

Today's Date (YYYY-MM-DD): {}
",
        today.format("%Y-%m-%d")
    )
}

/// Dispatches the prompt to every agent whose keywords occur in it.
///
/// Single-word keywords match whole words, case-insensitively; keywords
/// containing spaces match as substrings.
#[derive(Debug, Clone, Default)]
pub struct KeywordRouter {
    keywords: HashMap<String, Vec<String>>,
}

impl KeywordRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent<I, S>(mut self, agent: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.keywords.insert(
            agent.into(),
            keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        );
        self
    }

    fn matches<'a>(&'a self, agent: &str, prompt: &str, words: &[&str]) -> Vec<&'a str> {
        let Some(keywords) = self.keywords.get(agent) else {
            return Vec::new();
        };
        keywords
            .iter()
            .filter(|k| {
                if k.contains(' ') {
                    prompt.contains(k.as_str())
                } else {
                    words.contains(&k.as_str())
                }
            })
            .map(String::as_str)
            .collect()
    }
}

#[async_trait]
impl RoutingPolicy for KeywordRouter {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn plan(&self, request: &RoutingRequest) -> Result<RoutingPlan> {
        let prompt = request.prompt.to_lowercase();
        let words: Vec<&str> = prompt
            .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        let mut plan = RoutingPlan::default();
        for agent in &request.agents {
            let matched = self.matches(&agent.name, &prompt, &words);
            if matched.is_empty() {
                continue;
            }
            debug!(agent = %agent.name, ?matched, "Keyword route");
            plan.reasoning.push(format!(
                "Routing to {} (matched: {}).\n",
                agent.name,
                matched.join(", ")
            ));
            plan.dispatches.push(Dispatch {
                agent: agent.name.clone(),
                task: request.prompt.clone(),
            });
        }

        if plan.dispatches.is_empty() {
            plan.reasoning
                .push("No specialist agent matches this request.\n".to_string());
        }
        Ok(plan)
    }
}
