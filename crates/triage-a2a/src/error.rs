//! Error types for the A2A client layer
//!
//! One enum per network step so callers can tell which step failed.

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Failure obtaining a bearer token from the identity provider
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid identity provider config: {0}")]
    InvalidConfig(String),

    #[error("token endpoint {endpoint} unreachable: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("token endpoint rejected credentials: HTTP {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("token response has no access_token field")]
    MissingAccessToken,

    #[error("token endpoint did not respond within {0:?}")]
    Timeout(Duration),
}

impl AuthError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Failure fetching or parsing an agent card
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("agent card at {url} unreachable: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("agent card request to {url} failed: HTTP {status}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("agent card at {url} does not match the card schema: {reason}")]
    Schema { url: String, reason: String },

    #[error("agent card at {url} not returned within {after:?}")]
    Timeout { url: String, after: Duration },
}

impl ResolutionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure binding a client to a card; construction does no I/O
#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("agent '{agent}' prefers unsupported transport '{transport}'")]
    UnsupportedTransport { agent: String, transport: String },

    #[error("agent '{agent}' has no usable endpoint URL")]
    MissingUrl { agent: String },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header value for {name}")]
    InvalidHeader { name: &'static str },
}

/// Reply shape matches neither a message nor a task with update events
#[derive(Debug, Clone, Error)]
#[error("undecodable agent reply: {reason}")]
pub struct ProtocolDecodeError {
    pub reason: String,
}

impl ProtocolDecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Failure sending a message through a bound client
#[derive(Debug, Error)]
pub enum SendError {
    #[error("agent endpoint {url} unreachable: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("agent endpoint returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("agent returned JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("agent did not reply within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Decode(#[from] ProtocolDecodeError),
}

impl SendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
