//! A2A client: binds to a resolved card and sends messages over JSON-RPC

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::BearerToken;
use crate::endpoint::SESSION_HEADER;
use crate::error::{ClientBuildError, ProtocolDecodeError, SendError};
use crate::protocol::{
    AGENT_CARD_PATH, AgentCard, JsonRpcRequest, JsonRpcResponse, Message,
    SendMessageConfiguration, SendMessageParams, TRANSPORT_JSONRPC, Task, TaskState, TaskStatus,
    UpdateEvent, methods,
};
use crate::reply::{ClientEvent, WireEvent};
use crate::sse::SseDecoder;

/// Default bound on one sub-agent call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Build an HTTP client that sends the bearer token and session id on every
/// request. The token is marked sensitive so it never shows up in debug output.
pub fn authenticated_http_client(
    token: Option<&BearerToken>,
    session_id: &str,
    timeout: Duration,
) -> Result<Client, ClientBuildError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.secret()))
            .map_err(|_| ClientBuildError::InvalidHeader {
                name: "Authorization",
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }
    let invalid_session = ClientBuildError::InvalidHeader {
        name: SESSION_HEADER,
    };
    let name = HeaderName::from_bytes(SESSION_HEADER.as_bytes());
    let session = HeaderValue::from_str(session_id);
    match (name, session) {
        (Ok(name), Ok(session)) => headers.insert(name, session),
        _ => return Err(invalid_session),
    };

    Ok(Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?)
}

/// How bound clients talk to their agent
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Use `message/stream` when the card also declares streaming
    pub streaming: bool,
    pub accepted_output_modes: Vec<String>,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            streaming: false,
            accepted_output_modes: Vec::new(),
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Produces bound clients from agent cards
#[derive(Clone)]
pub struct ClientFactory {
    http: Client,
    config: ClientConfig,
}

impl ClientFactory {
    pub fn new(http: Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    /// Bind a client to `card`. Performs no I/O.
    pub fn create(&self, card: &AgentCard) -> Result<A2aClient, ClientBuildError> {
        if !card
            .preferred_transport
            .eq_ignore_ascii_case(TRANSPORT_JSONRPC)
        {
            return Err(ClientBuildError::UnsupportedTransport {
                agent: card.name.clone(),
                transport: card.preferred_transport.clone(),
            });
        }

        let url = endpoint_for(card).ok_or_else(|| ClientBuildError::MissingUrl {
            agent: card.name.clone(),
        })?;
        let streaming = self.config.streaming && card.capabilities.streaming;
        debug!(agent = %card.name, %url, streaming, "Bound A2A client");

        Ok(A2aClient {
            http: self.http.clone(),
            url,
            agent: card.name.clone(),
            streaming,
            accepted_output_modes: self.config.accepted_output_modes.clone(),
            timeout: self.config.timeout,
        })
    }
}

/// The card's own `url`, else the base the card was fetched from
fn endpoint_for(card: &AgentCard) -> Option<String> {
    if let Some(url) = card.url.as_deref().filter(|u| !u.trim().is_empty()) {
        return Some(url.to_string());
    }
    card.source_url
        .strip_suffix(AGENT_CARD_PATH)
        .filter(|base| !base.is_empty())
        .map(str::to_string)
}

/// A client bound to one remote agent
#[derive(Clone)]
pub struct A2aClient {
    http: Client,
    url: String,
    agent: String,
    streaming: bool,
    accepted_output_modes: Vec<String>,
    timeout: Duration,
}

impl std::fmt::Debug for A2aClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("A2aClient")
            .field("agent", &self.agent)
            .field("url", &self.url)
            .field("streaming", &self.streaming)
            .finish()
    }
}

impl A2aClient {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Send one message. The returned stream is lazy: nothing goes over the
    /// wire until it is polled.
    ///
    /// Without streaming the stream yields exactly one event. With streaming,
    /// each update event is folded into the current task snapshot and yielded
    /// alongside it. A `result` that decodes as neither a message nor a task
    /// is yielded as [`ClientEvent::Raw`] so the answer can still be read
    /// from its agent history.
    pub fn send_message(&self, message: Message) -> BoxStream<'static, Result<ClientEvent, SendError>> {
        let client = self.clone();
        if self.streaming {
            Box::pin(async_stream::try_stream! {
                let resp = client.post(methods::MESSAGE_STREAM, message, "text/event-stream").await?;
                let mut body = resp.bytes_stream();
                let mut decoder = SseDecoder::new();
                let mut current: Option<Task> = None;

                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| client.transport_error(e))?;
                    for data in decoder.push(&chunk) {
                        yield absorb(&mut current, &data)?;
                    }
                }
                if let Some(data) = decoder.finish() {
                    yield absorb(&mut current, &data)?;
                }
                info!(agent = %client.agent, "Stream closed");
            })
        } else {
            Box::pin(async_stream::try_stream! {
                let resp = client.post(methods::MESSAGE_SEND, message, "application/json").await?;
                let bytes = resp.bytes().await.map_err(|e| client.transport_error(e))?;
                let envelope: JsonRpcResponse = serde_json::from_slice(&bytes)
                    .map_err(|e| ProtocolDecodeError::new(format!("response is not JSON-RPC: {e}")))?;

                let result = into_result(envelope)?;
                match WireEvent::decode(result.clone()) {
                    Ok(WireEvent::Message(message)) => {
                        yield ClientEvent::Message(message);
                    }
                    Ok(WireEvent::Task(task)) => {
                        debug!(agent = %client.agent, task_id = %task.id, state = %task.status.state, "Task reply");
                        yield ClientEvent::Task(task, None);
                    }
                    Ok(WireEvent::Update(update)) => {
                        warn!(agent = %client.agent, task_id = %update.task_id(), "message/send returned a bare update");
                        yield ClientEvent::Raw(result);
                    }
                    Err(e) => {
                        debug!(agent = %client.agent, error = %e, "Keeping undecoded reply");
                        yield ClientEvent::Raw(result);
                    }
                }
            })
        }
    }

    async fn post(
        &self,
        method: &'static str,
        message: Message,
        accept: &'static str,
    ) -> Result<Response, SendError> {
        let request = JsonRpcRequest::new(
            method,
            SendMessageParams {
                message,
                configuration: Some(SendMessageConfiguration {
                    accepted_output_modes: self.accepted_output_modes.clone(),
                    blocking: true,
                }),
            },
        );
        debug!(agent = %self.agent, method, id = %request.id, "Sending JSON-RPC request");

        let resp = self
            .http
            .post(&self.url)
            .header(ACCEPT, accept)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(agent = %self.agent, %status, "Agent rejected request");
            return Err(SendError::Status { status, body });
        }
        Ok(resp)
    }

    fn transport_error(&self, e: reqwest::Error) -> SendError {
        if e.is_timeout() {
            SendError::Timeout(self.timeout)
        } else {
            SendError::Transport {
                url: self.url.clone(),
                source: e,
            }
        }
    }
}

fn into_result(envelope: JsonRpcResponse) -> Result<Value, SendError> {
    if let Some(error) = envelope.error {
        return Err(SendError::Rpc {
            code: error.code,
            message: error.message,
        });
    }
    envelope
        .result
        .ok_or_else(|| ProtocolDecodeError::new("response has neither result nor error").into())
}

/// Decode one streamed envelope and fold it into the running task.
/// Results of no known shape pass through as [`ClientEvent::Raw`].
fn absorb(current: &mut Option<Task>, data: &str) -> Result<ClientEvent, SendError> {
    let envelope: JsonRpcResponse = serde_json::from_str(data)
        .map_err(|e| ProtocolDecodeError::new(format!("stream event is not JSON-RPC: {e}")))?;

    let result = into_result(envelope)?;
    match WireEvent::decode(result.clone()) {
        Ok(WireEvent::Message(message)) => Ok(ClientEvent::Message(message)),
        Ok(WireEvent::Task(task)) => {
            *current = Some(task.clone());
            Ok(ClientEvent::Task(task, None))
        }
        Ok(WireEvent::Update(update)) => {
            let task = current.get_or_insert_with(|| placeholder_task(&update));
            apply_update(task, &update);
            Ok(ClientEvent::Task(task.clone(), Some(update)))
        }
        Err(_) => Ok(ClientEvent::Raw(result)),
    }
}

/// Task snapshot for updates that arrive before any task object
fn placeholder_task(update: &UpdateEvent) -> Task {
    let (task_id, context_id) = match update {
        UpdateEvent::Status(e) => (&e.task_id, &e.context_id),
        UpdateEvent::Artifact(e) => (&e.task_id, &e.context_id),
    };
    Task {
        kind: "task".to_string(),
        id: task_id.clone(),
        context_id: context_id.clone(),
        status: TaskStatus {
            state: TaskState::Submitted,
            message: None,
            timestamp: None,
        },
        history: Vec::new(),
        artifacts: Vec::new(),
        metadata: None,
    }
}

fn apply_update(task: &mut Task, update: &UpdateEvent) {
    match update {
        UpdateEvent::Status(e) => {
            if let Some(message) = &e.status.message {
                task.history.push(message.clone());
            }
            task.status = e.status.clone();
        }
        UpdateEvent::Artifact(e) => {
            let existing = task
                .artifacts
                .iter_mut()
                .find(|a| !e.artifact.artifact_id.is_empty() && a.artifact_id == e.artifact.artifact_id);
            match existing {
                Some(artifact) if e.append => artifact.parts.extend(e.artifact.parts.iter().cloned()),
                Some(artifact) => *artifact = e.artifact.clone(),
                None => task.artifacts.push(e.artifact.clone()),
            }
        }
    }
}
