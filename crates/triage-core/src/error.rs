//! Error types for the host agent core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use triage_a2a::{AuthError, ClientBuildError, ResolutionError, SendError};

/// Failure reading from a secret store
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("secret '{0}' not found")]
    NotFound(String),

    #[error("secret '{path}' is invalid: {reason}")]
    Invalid { path: String, reason: String },

    #[error("failed to read secret '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The lazy-resolution step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStep {
    Secret,
    Auth,
    Card,
    Client,
}

impl std::fmt::Display for ResolutionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Secret => write!(f, "secret lookup"),
            Self::Auth => write!(f, "token exchange"),
            Self::Card => write!(f, "card resolution"),
            Self::Client => write!(f, "client construction"),
        }
    }
}

/// Underlying cause of a resolution failure
#[derive(Debug, Error)]
pub enum ResolutionCause {
    #[error(transparent)]
    Secret(#[from] SecretError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Card(#[from] ResolutionError),
    #[error(transparent)]
    Client(#[from] ClientBuildError),
}

impl ResolutionCause {
    pub fn step(&self) -> ResolutionStep {
        match self {
            Self::Secret(_) => ResolutionStep::Secret,
            Self::Auth(_) => ResolutionStep::Auth,
            Self::Card(_) => ResolutionStep::Card,
            Self::Client(_) => ResolutionStep::Client,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Auth(e) => e.is_timeout(),
            Self::Card(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// Failure of a remote agent proxy
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("agent '{agent}' failed during {step}: {source}")]
    Resolution {
        agent: String,
        step: ResolutionStep,
        #[source]
        source: ResolutionCause,
    },

    #[error("agent '{agent}' has not been resolved")]
    NotResolved { agent: String },

    #[error("agent '{agent}' send failed: {source}")]
    Send {
        agent: String,
        #[source]
        source: SendError,
    },

    #[error("agent '{agent}' did not reply within {after:?}")]
    Timeout { agent: String, after: Duration },
}

impl ProxyError {
    pub(crate) fn resolution(agent: &str, cause: impl Into<ResolutionCause>) -> Self {
        let source = cause.into();
        Self::Resolution {
            agent: agent.to_string(),
            step: source.step(),
            source,
        }
    }

    /// Step that failed, for resolution errors
    pub fn step(&self) -> Option<ResolutionStep> {
        match self {
            Self::Resolution { step, .. } => Some(*step),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Resolution { source, .. } => source.is_timeout(),
            Self::Send { source, .. } => source.is_timeout(),
            Self::NotResolved { .. } => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::Resolution {
                source: ResolutionCause::Auth(_),
                ..
            }
        )
    }
}

/// Caller-facing failure of a whole turn; nothing is dispatched when one
/// of these is returned
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("missing session id")]
    MissingSession,

    #[error("no remote agents are registered")]
    EmptyRegistry,

    #[error("failed to set up session: {0}")]
    Setup(String),
}

/// Invalid or unreadable host configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("config must list at least one agent")]
    NoAgents,

    #[error("duplicate agent name '{0}'")]
    DuplicateAgent(String),

    #[error("agent '{agent}': {reason}")]
    InvalidAgent { agent: String, reason: String },
}

/// No JSON object could be extracted from free-form text
#[derive(Debug, Clone, Error)]
#[error("no JSON object found in reply: {reason}")]
pub struct ParseError {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_error_names_step() {
        let err = ProxyError::resolution(
            "Monitoring_Agent",
            SecretError::NotFound("/app/monitoring/idp".to_string()),
        );
        assert_eq!(err.step(), Some(ResolutionStep::Secret));
        let text = err.to_string();
        assert!(text.contains("Monitoring_Agent"));
        assert!(text.contains("secret lookup"));
        assert!(!err.is_timeout());
        assert!(!err.is_auth());
    }

    #[test]
    fn test_auth_timeout_propagates() {
        let err = ProxyError::resolution("a", AuthError::Timeout(Duration::from_secs(30)));
        assert!(err.is_timeout());
        assert!(err.is_auth());
        assert_eq!(err.step(), Some(ResolutionStep::Auth));
    }

    #[test]
    fn test_turn_error_messages() {
        assert_eq!(
            TurnError::MissingField("prompt").to_string(),
            "missing required field 'prompt'"
        );
        assert_eq!(TurnError::MissingSession.to_string(), "missing session id");
    }
}
