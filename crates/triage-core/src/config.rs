//! Host configuration: YAML file listing the remote agents to route to

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use triage_a2a::{agent_card_url, runtime_invocation_url};

use crate::error::ConfigError;

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "TRIAGE_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    #[serde(default)]
    pub secrets: SecretsConfig,
    pub agents: Vec<AgentEndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default = "default_host_name")]
    pub name: String,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,
    /// Use `message/stream` for agents whose card declares streaming
    #[serde(default)]
    pub streaming: bool,
    /// Turns kept per session by the recent-turns observer
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            call_timeout_secs: default_call_timeout_secs(),
            token_timeout_secs: default_token_timeout_secs(),
            streaming: false,
            recent_turns: default_recent_turns(),
        }
    }
}

impl HostSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.token_timeout_secs)
    }
}

fn default_host_name() -> String {
    "Host_Agent".to_string()
}

fn default_call_timeout_secs() -> u64 {
    300
}

fn default_token_timeout_secs() -> u64 {
    30
}

fn default_recent_turns() -> usize {
    5
}

/// Which secret store backs the identity-provider lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub provider: SecretsProviderType,
    #[serde(default)]
    pub secrets_dir: Option<PathBuf>,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            provider: SecretsProviderType::Env,
            secrets_dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SecretsProviderType {
    #[default]
    Env,
    File,
    Memory,
}

/// One remote specialist agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEndpointConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub runtime_arn: String,
    /// Secret store path of the agent's identity provider config
    pub secret_path: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Invocation base URL used instead of the AgentCore runtime URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl AgentEndpointConfig {
    /// Base URL that JSON-RPC requests and the card path hang off
    pub fn invocation_base(&self) -> String {
        match &self.endpoint_url {
            Some(url) => url.clone(),
            None => runtime_invocation_url(&self.region, &self.runtime_arn),
        }
    }

    pub fn card_url(&self) -> String {
        agent_card_url(&self.invocation_base())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidAgent {
            agent: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if self.secret_path.trim().is_empty() {
            return Err(invalid("secret_path is empty"));
        }
        if self.endpoint_url.is_none() {
            if self.region.trim().is_empty() {
                return Err(invalid("region is required without endpoint_url"));
            }
            if self.runtime_arn.trim().is_empty() {
                return Err(invalid("runtime_arn is required without endpoint_url"));
            }
        }
        Ok(())
    }
}

impl HostConfig {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = serde_yml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading config from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    /// Explicit path, else `$TRIAGE_CONFIG`, else `config.yaml`
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agents.is_empty() {
            return Err(ConfigError::NoAgents);
        }
        let mut seen = HashSet::new();
        for agent in &self.agents {
            agent.validate()?;
            if !seen.insert(agent.name.as_str()) {
                return Err(ConfigError::DuplicateAgent(agent.name.clone()));
            }
        }
        Ok(())
    }

    pub fn agent(&self, name: &str) -> Option<&AgentEndpointConfig> {
        self.agents.iter().find(|a| a.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
host:
  name: Host_Agent
  streaming: true
secrets:
  provider: file
  secrets_dir: ./secrets
agents:
  - name: Monitoring_Agent
    description: Watches CloudWatch metrics, logs and alarms; files Jira tickets
    region: us-east-1
    runtime_arn: arn:aws:bedrock-agentcore:us-east-1:111122223333:runtime/monitoring-XyZ
    secret_path: /app/monitoring/idp
    keywords: [cloudwatch, logs, alarm]
  - name: OpsRemediation_Agent
    description: Researches remediation strategies
    secret_path: /app/remediation/idp
    endpoint_url: http://localhost:9001/
"#;

    #[test]
    fn test_parse_sample() {
        let config = HostConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.agents.len(), 2);
        assert!(config.host.streaming);
        assert_eq!(config.host.call_timeout(), Duration::from_secs(300));
        assert_eq!(config.host.token_timeout(), Duration::from_secs(30));
        assert_eq!(config.host.recent_turns, 5);
        assert_eq!(config.secrets.provider, SecretsProviderType::File);
        assert_eq!(config.agents[0].keywords, vec!["cloudwatch", "logs", "alarm"]);
    }

    #[test]
    fn test_card_url_from_runtime_arn() {
        let config = HostConfig::from_yaml(SAMPLE).unwrap();
        let url = config.agents[0].card_url();
        assert!(url.starts_with("https://bedrock-agentcore.us-east-1.amazonaws.com/runtimes/arn%3Aaws"));
        assert!(url.ends_with("/invocations/.well-known/agent-card.json"));
    }

    #[test]
    fn test_endpoint_override() {
        let config = HostConfig::from_yaml(SAMPLE).unwrap();
        let remediation = config.agent("OpsRemediation_Agent").unwrap();
        assert_eq!(remediation.invocation_base(), "http://localhost:9001/");
        assert_eq!(
            remediation.card_url(),
            "http://localhost:9001/.well-known/agent-card.json"
        );
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let yaml = r#"
agents:
  - {name: A, description: a, secret_path: /a, endpoint_url: "http://a"}
  - {name: A, description: b, secret_path: /b, endpoint_url: "http://b"}
"#;
        assert!(matches!(
            HostConfig::from_yaml(yaml),
            Err(ConfigError::DuplicateAgent(name)) if name == "A"
        ));
    }

    #[test]
    fn test_rejects_empty_agents() {
        assert!(matches!(
            HostConfig::from_yaml("agents: []"),
            Err(ConfigError::NoAgents)
        ));
    }

    #[test]
    fn test_requires_runtime_without_endpoint() {
        let yaml = r#"
agents:
  - {name: A, description: a, secret_path: /a, region: us-east-1}
"#;
        assert!(matches!(
            HostConfig::from_yaml(yaml),
            Err(ConfigError::InvalidAgent { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.host.name, "Host_Agent");

        let missing = HostConfig::load(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_resolve_path_prefers_explicit() {
        let path = HostConfig::resolve_path(Some(Path::new("/etc/triage.yaml")));
        assert_eq!(path, PathBuf::from("/etc/triage.yaml"));
    }
}
