//! Secret stores: where each agent's identity provider config lives
//!
//! A secret is addressed by a slash-separated path (`/app/monitoring/idp`)
//! and holds the JSON-encoded [`IdentityProviderConfig`].

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use triage_a2a::IdentityProviderConfig;

use crate::config::{SecretsConfig, SecretsProviderType};
use crate::error::SecretError;

/// A store resolving secret paths to values
#[async_trait]
pub trait SecretStore: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with [`SecretError::NotFound`] when nothing is stored at `path`
    async fn get(&self, path: &str) -> Result<String, SecretError>;
}

/// Fetch and decode the identity provider config stored at `path`
pub async fn identity_provider(
    store: &dyn SecretStore,
    path: &str,
) -> Result<IdentityProviderConfig, SecretError> {
    debug!(store = store.name(), path, "Resolving identity provider config");
    let raw = store.get(path).await?;
    serde_json::from_str(&raw).map_err(|e| SecretError::Invalid {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

/// Build the store named by the config
pub fn from_config(config: &SecretsConfig) -> Arc<dyn SecretStore> {
    match config.provider {
        SecretsProviderType::Env => Arc::new(EnvSecretStore),
        SecretsProviderType::File => {
            let dir = config
                .secrets_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from("/run/secrets"));
            Arc::new(FileSecretStore::new(dir))
        }
        SecretsProviderType::Memory => Arc::new(MemorySecretStore::new()),
    }
}

/// Reads `/app/monitoring/idp` from `APP_MONITORING_IDP`
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn var_name(path: &str) -> String {
        path.split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_uppercase)
            .collect::<Vec<_>>()
            .join("_")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    fn name(&self) -> &str {
        "env"
    }

    async fn get(&self, path: &str) -> Result<String, SecretError> {
        let var = Self::var_name(path);
        if var.is_empty() {
            return Err(SecretError::NotFound(path.to_string()));
        }
        std::env::var(&var).map_err(|_| SecretError::NotFound(path.to_string()))
    }
}

/// Reads `{secrets_dir}/app/monitoring/idp`
pub struct FileSecretStore {
    secrets_dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: secrets_dir.into(),
        }
    }

    fn file_for(&self, path: &str) -> Result<PathBuf, SecretError> {
        let relative = Path::new(path.trim_start_matches('/'));
        let traversal = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if relative.as_os_str().is_empty() || traversal || path.contains('\0') {
            return Err(SecretError::Invalid {
                path: path.to_string(),
                reason: "path must stay inside the secrets directory".to_string(),
            });
        }
        Ok(self.secrets_dir.join(relative))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, path: &str) -> Result<String, SecretError> {
        let file = self.file_for(path)?;
        match tokio::fs::read_to_string(&file).await {
            Ok(content) => Ok(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SecretError::NotFound(path.to_string()))
            }
            Err(source) => Err(SecretError::Io {
                path: path.to_string(),
                source,
            }),
        }
    }
}

/// In-memory store; values can be replaced while in use
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, path: impl Into<String>, value: impl Into<String>) {
        self.secrets.write().await.insert(path.into(), value.into());
    }

    pub async fn set_identity_provider(&self, path: impl Into<String>, idp: &IdentityProviderConfig) {
        let value = serde_json::to_string(idp).unwrap_or_default();
        self.set(path, value).await;
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &str) -> Result<String, SecretError> {
        self.secrets
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(path.to_string()))
    }
}
