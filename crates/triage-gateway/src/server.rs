//! Gateway server: axum router over a shared [`HostRuntime`]

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tracing::{info, warn};
use triage_a2a::SESSION_HEADER;
use triage_core::{HostRuntime, InvocationRequest};

use crate::protocol::{ERR_INVALID_BODY, ErrorBody, InvocationBody, PingResponse, turn_error_response};

pub struct GatewayServer {
    runtime: Arc<HostRuntime>,
}

impl GatewayServer {
    pub fn new(runtime: Arc<HostRuntime>) -> Self {
        Self { runtime }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ping", get(ping))
            .route("/invocations", post(invocations))
            .with_state(self.runtime.clone())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("listener has no local address")?;
        info!("Gateway listening on {}", addr);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("gateway server failed")
    }

    /// Bind `addr` and serve until Ctrl-C
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down gateway");
        })
        .await
    }
}

async fn ping() -> Json<PingResponse> {
    Json(PingResponse::healthy())
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json") && !accept.contains("text/event-stream"))
}

fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    (status, Json(body)).into_response()
}

async fn invocations(
    State(runtime): State<Arc<HostRuntime>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: InvocationBody = if body.is_empty() {
        InvocationBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(body) => body,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    ErrorBody::new(ERR_INVALID_BODY, format!("body is not valid JSON: {e}")),
                );
            }
        }
    };

    let request = InvocationRequest {
        prompt: body.prompt,
        session_id: headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    if wants_json(&headers) {
        return match runtime.handle_aggregated(&request).await {
            Ok(summary) => Json(summary).into_response(),
            Err(e) => {
                let (status, body) = turn_error_response(&e);
                warn!(%status, "Invocation rejected: {}", e);
                error_response(status, body)
            }
        };
    }

    match runtime.handle(&request).await {
        Ok(events) => {
            let events = events.map(|event| Event::default().json_data(&event));
            Sse::new(events).keep_alive(KeepAlive::default()).into_response()
        }
        Err(e) => {
            let (status, body) = turn_error_response(&e);
            warn!(%status, "Invocation rejected: {}", e);
            error_response(status, body)
        }
    }
}
