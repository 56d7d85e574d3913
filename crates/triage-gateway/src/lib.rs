//! triage-gateway: HTTP entrypoint for the host agent
//!
//! `POST /invocations` runs one orchestrator turn for the session named in
//! the runtime session header and streams its events as SSE, or returns one
//! aggregated JSON summary when the caller accepts only JSON.
//! `GET /ping` is the health check.

pub mod protocol;
pub mod server;

pub use server::GatewayServer;
