//! OAuth2 client-credentials token exchange against the identity provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::AuthError;

/// Default bound on one token endpoint round trip
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity provider settings, as stored in the secret store
#[derive(Clone, Serialize, Deserialize)]
pub struct IdentityProviderConfig {
    pub domain: String,
    /// Cognito pool id; the region is the prefix before the first `_`
    pub user_pool_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub resource_server_identifier: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl std::fmt::Debug for IdentityProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityProviderConfig")
            .field("domain", &self.domain)
            .field("user_pool_id", &self.user_pool_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("resource_server_identifier", &self.resource_server_identifier)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl IdentityProviderConfig {
    pub fn region(&self) -> Result<&str, AuthError> {
        match self.user_pool_id.split_once('_') {
            Some((region, _)) if !region.is_empty() => Ok(region),
            _ => Err(AuthError::InvalidConfig(format!(
                "user_pool_id '{}' has no region prefix",
                self.user_pool_id
            ))),
        }
    }

    /// `{resource_server}/{scope}` for every scope, space separated, input order kept
    pub fn scope_string(&self) -> String {
        self.scopes
            .iter()
            .map(|scope| format!("{}/{}", self.resource_server_identifier, scope))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn token_endpoint(&self) -> Result<String, AuthError> {
        if self.domain.is_empty() {
            return Err(AuthError::InvalidConfig("domain is empty".to_string()));
        }
        Ok(format!(
            "https://{}.auth.{}.amazoncognito.com/oauth2/token",
            self.domain,
            self.region()?
        ))
    }
}

/// An access token; held for one session, never logged
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken([REDACTED])")
    }
}

/// Source of bearer tokens for downstream agents
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self, idp: &IdentityProviderConfig) -> Result<BearerToken, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
}

/// Client-credentials grant against a Cognito-style token endpoint.
///
/// One POST per call, no retries and no caching; the caller decides how
/// long a token lives.
#[derive(Clone)]
pub struct ClientCredentialsProvider {
    http: Client,
    timeout: Duration,
    endpoint_override: Option<String>,
}

impl Default for ClientCredentialsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCredentialsProvider {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            timeout: DEFAULT_TOKEN_TIMEOUT,
            endpoint_override: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Post to a fixed token endpoint instead of deriving it from the config
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint_for(&self, idp: &IdentityProviderConfig) -> Result<String, AuthError> {
        match &self.endpoint_override {
            Some(endpoint) => Ok(endpoint.clone()),
            None => idp.token_endpoint(),
        }
    }
}

#[async_trait]
impl CredentialProvider for ClientCredentialsProvider {
    async fn bearer_token(&self, idp: &IdentityProviderConfig) -> Result<BearerToken, AuthError> {
        let endpoint = self.endpoint_for(idp)?;
        let scope = idp.scope_string();
        debug!(endpoint = %endpoint, client_id = %idp.client_id, "Requesting client-credentials token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", idp.client_id.as_str()),
            ("client_secret", idp.client_secret.as_str()),
            ("scope", scope.as_str()),
        ];

        let resp = self
            .http
            .post(&endpoint)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthError::Timeout(self.timeout)
                } else {
                    AuthError::Transport {
                        endpoint: endpoint.clone(),
                        source: e,
                    }
                }
            })?;

        let status = resp.status();
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(AuthError::Timeout(self.timeout)),
            Err(e) => {
                return Err(AuthError::Transport {
                    endpoint,
                    source: e,
                });
            }
        };

        if !status.is_success() {
            warn!(endpoint = %endpoint, %status, "Token request rejected");
            return Err(AuthError::Rejected { status, body });
        }

        let token = serde_json::from_str::<TokenResponse>(&body)
            .ok()
            .and_then(|t| t.access_token)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingAccessToken)?;

        info!(client_id = %idp.client_id, "Obtained bearer token");
        Ok(BearerToken::new(token))
    }
}
