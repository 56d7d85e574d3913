//! A2A (Agent-to-Agent) protocol client
//!
//! Everything needed to reach a remote specialist agent: a client-credentials
//! token from the identity provider, the agent card from its well-known
//! path, and a bound JSON-RPC client that sends messages and decodes replies.

pub mod auth;
pub mod card;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod protocol;
pub mod reply;
pub mod sse;

pub use auth::{BearerToken, ClientCredentialsProvider, CredentialProvider, IdentityProviderConfig};
pub use card::CardResolver;
pub use client::{A2aClient, ClientConfig, ClientFactory, authenticated_http_client};
pub use endpoint::{SESSION_HEADER, agent_card_url, runtime_invocation_url};
pub use error::{AuthError, ClientBuildError, ProtocolDecodeError, ResolutionError, SendError};
pub use protocol::{AgentCard, Message, Part, Role, Task, TaskState, UpdateEvent};
pub use reply::{ClientEvent, Reply, WireEvent};
pub use sse::SseDecoder;
