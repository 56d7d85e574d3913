//! Remote agent proxy: a named handle on one remote agent that resolves
//! lazily and memoizes the resolved card and bound client.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use triage_a2a::card::DEFAULT_CARD_TIMEOUT;
use triage_a2a::{
    A2aClient, AgentCard, CardResolver, ClientConfig, ClientFactory, CredentialProvider, Message,
    ProtocolDecodeError, Reply, SendError, authenticated_http_client,
};

use crate::config::AgentEndpointConfig;
use crate::error::ProxyError;
use crate::secrets::{SecretStore, identity_provider};

/// Collaborators shared by every proxy of a session
#[derive(Clone)]
pub struct ProxyContext {
    pub session_id: String,
    pub secrets: Arc<dyn SecretStore>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub client: ClientConfig,
    pub card_timeout: Duration,
}

impl ProxyContext {
    pub fn new(
        session_id: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            secrets,
            credentials,
            client: ClientConfig::default(),
            card_timeout: DEFAULT_CARD_TIMEOUT,
        }
    }

    pub fn with_client_config(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }
}

struct Resolved {
    card: AgentCard,
    client: A2aClient,
}

pub struct RemoteAgentProxy {
    config: AgentEndpointConfig,
    context: ProxyContext,
    resolved: OnceCell<Resolved>,
}

impl std::fmt::Debug for RemoteAgentProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAgentProxy")
            .field("name", &self.config.name)
            .field("card_url", &self.card_url())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl RemoteAgentProxy {
    /// No I/O happens until [`ensure_resolved`](Self::ensure_resolved)
    pub fn new(config: AgentEndpointConfig, context: ProxyContext) -> Self {
        Self {
            config,
            context,
            resolved: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn description(&self) -> &str {
        &self.config.description
    }

    pub fn keywords(&self) -> &[String] {
        &self.config.keywords
    }

    pub fn card_url(&self) -> String {
        self.config.card_url()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    pub fn card(&self) -> Option<&AgentCard> {
        self.resolved.get().map(|r| &r.card)
    }

    /// Resolve on first call, no-op afterwards.
    ///
    /// Concurrent callers wait on the same resolution. A failure leaves the
    /// proxy unresolved so a later call retries from the secret lookup.
    pub async fn ensure_resolved(&self) -> Result<&AgentCard, ProxyError> {
        let resolved = self.resolved.get_or_try_init(|| self.resolve()).await?;
        Ok(&resolved.card)
    }

    async fn resolve(&self) -> Result<Resolved, ProxyError> {
        let name = self.name();
        let ctx = &self.context;
        info!(agent = %name, session_id = %ctx.session_id, "Resolving remote agent");

        let idp = identity_provider(ctx.secrets.as_ref(), &self.config.secret_path)
            .await
            .map_err(|e| ProxyError::resolution(name, e))?;

        let token = ctx
            .credentials
            .bearer_token(&idp)
            .await
            .map_err(|e| ProxyError::resolution(name, e))?;

        let http = authenticated_http_client(Some(&token), &ctx.session_id, ctx.client.timeout)
            .map_err(|e| ProxyError::resolution(name, e))?;

        let card = CardResolver::new(http.clone())
            .with_timeout(ctx.card_timeout)
            .resolve(&self.config.invocation_base())
            .await
            .map_err(|e| ProxyError::resolution(name, e))?;

        let client = ClientFactory::new(http, ctx.client.clone())
            .create(&card)
            .map_err(|e| ProxyError::resolution(name, e))?;

        debug!(agent = %name, url = %client.url(), "Remote agent resolved");
        Ok(Resolved { card, client })
    }

    /// Send one message and wait for the final reply.
    ///
    /// With streaming enabled the last event of the stream is the reply,
    /// since each event carries the accumulated task.
    pub async fn send(&self, message: Message) -> Result<Reply, ProxyError> {
        let resolved = self.resolved.get().ok_or_else(|| ProxyError::NotResolved {
            agent: self.name().to_string(),
        })?;
        let timeout = self.context.client.timeout;

        let collect = async {
            let mut stream = resolved.client.send_message(message);
            let mut last = None;
            while let Some(event) = stream.next().await {
                last = Some(event?);
            }
            last.map(Reply::from).ok_or_else(|| {
                SendError::from(ProtocolDecodeError::new("agent closed the stream without a reply"))
            })
        };

        match tokio::time::timeout(timeout, collect).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(source)) => {
                warn!(agent = %self.name(), error = %source, "Send failed");
                Err(ProxyError::Send {
                    agent: self.name().to_string(),
                    source,
                })
            }
            Err(_) => {
                warn!(agent = %self.name(), ?timeout, "Send timed out");
                Err(ProxyError::Timeout {
                    agent: self.name().to_string(),
                    after: timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResolutionStep;
    use crate::secrets::MemorySecretStore;
    use triage_a2a::ClientCredentialsProvider;

    fn proxy() -> RemoteAgentProxy {
        let config = AgentEndpointConfig {
            name: "Monitoring_Agent".to_string(),
            description: "Watches CloudWatch".to_string(),
            region: "us-east-1".to_string(),
            runtime_arn: "arn:aws:bedrock-agentcore:us-east-1:1:runtime/m".to_string(),
            secret_path: "/app/monitoring/idp".to_string(),
            keywords: vec![],
            endpoint_url: None,
        };
        let context = ProxyContext::new(
            "session-1",
            Arc::new(MemorySecretStore::new()),
            Arc::new(ClientCredentialsProvider::new()),
        );
        RemoteAgentProxy::new(config, context)
    }

    #[test]
    fn test_name_and_description_need_no_io() {
        let p = proxy();
        assert_eq!(p.name(), "Monitoring_Agent");
        assert_eq!(p.description(), "Watches CloudWatch");
        assert!(p.card_url().ends_with("/invocations/.well-known/agent-card.json"));
        assert!(!p.is_resolved());
        assert!(p.card().is_none());
    }

    #[tokio::test]
    async fn test_send_before_resolution() {
        let err = proxy().send(Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotResolved { agent } if agent == "Monitoring_Agent"));
    }

    #[tokio::test]
    async fn test_missing_secret_fails_at_secret_step() {
        let p = proxy();
        let err = p.ensure_resolved().await.unwrap_err();
        assert_eq!(err.step(), Some(ResolutionStep::Secret));
        assert!(!p.is_resolved());

        let err = p.send(Message::user("hi")).await.unwrap_err();
        assert!(matches!(err, ProxyError::NotResolved { .. }));
    }
}
