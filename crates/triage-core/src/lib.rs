//! triage-core: the host agent
//!
//! Holds one [`RemoteAgentProxy`] per configured specialist agent, routes
//! each operator turn to the right ones through a [`RoutingPolicy`], and
//! streams their replies back as [`OrchestratorEvent`]s. Sessions own all
//! per-caller state; there is no process-wide agent instance.

pub mod config;
pub mod error;
pub mod observer;
pub mod orchestrator;
pub mod proxy;
pub mod routing;
pub mod secrets;
pub mod session;
pub mod structured;

pub use config::{AgentEndpointConfig, HostConfig};
pub use error::{ConfigError, ParseError, ProxyError, ResolutionStep, SecretError, TurnError};
pub use observer::{RecentTurnsObserver, TurnMessage, TurnObserver};
pub use orchestrator::{AgentRegistry, Orchestrator, OrchestratorEvent, TurnSummary};
pub use proxy::{ProxyContext, RemoteAgentProxy};
pub use routing::{KeywordRouter, RoutingPolicy};
pub use secrets::SecretStore;
pub use session::{Admission, HostRuntime, InvocationRequest, Session, SessionManager};
pub use structured::parse_structured_reply;
