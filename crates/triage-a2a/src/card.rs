//! Agent card resolution from the well-known metadata path

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info};

use crate::endpoint::agent_card_url;
use crate::error::ResolutionError;
use crate::protocol::AgentCard;

pub const DEFAULT_CARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches agent cards. Holds no mutable state, so one resolver can serve
/// concurrent resolutions for different agents.
#[derive(Clone)]
pub struct CardResolver {
    http: Client,
    timeout: Duration,
}

impl CardResolver {
    /// `http` carries whatever auth headers the agent requires
    pub fn new(http: Client) -> Self {
        Self {
            http,
            timeout: DEFAULT_CARD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// One GET of `{base_url}/.well-known/agent-card.json`
    pub async fn resolve(&self, base_url: &str) -> Result<AgentCard, ResolutionError> {
        let url = agent_card_url(base_url);
        debug!("Fetching agent card from {}", url);

        let resp = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ResolutionError::Status { url, status, body });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| self.transport_error(&url, e))?;

        let mut card: AgentCard =
            serde_json::from_slice(&bytes).map_err(|e| ResolutionError::Schema {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        if card.name.trim().is_empty() || card.description.trim().is_empty() {
            return Err(ResolutionError::Schema {
                url,
                reason: "name and description must be non-empty".to_string(),
            });
        }
        card.source_url = url;

        info!(
            "Resolved agent card: {} (transport: {}, streaming: {})",
            card.name, card.preferred_transport, card.capabilities.streaming
        );
        Ok(card)
    }

    fn transport_error(&self, url: &str, e: reqwest::Error) -> ResolutionError {
        if e.is_timeout() {
            ResolutionError::Timeout {
                url: url.to_string(),
                after: self.timeout,
            }
        } else {
            ResolutionError::Unreachable {
                url: url.to_string(),
                source: e,
            }
        }
    }
}

/// Resolve a card with a one-off resolver
pub async fn resolve(base_url: &str, http: &Client) -> Result<AgentCard, ResolutionError> {
    CardResolver::new(http.clone()).resolve(base_url).await
}
