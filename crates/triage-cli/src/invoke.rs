//! Invoke a deployed host runtime over HTTP
//!
//! POSTs `{"prompt": ...}` with a client-credentials bearer token and the
//! runtime session header, then decodes the `text/event-stream` reply.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::{debug, info};
use triage_a2a::{CredentialProvider, IdentityProviderConfig, SseDecoder, authenticated_http_client};

/// One `data:` payload from the host
#[derive(Debug, Clone, PartialEq)]
pub enum HostPayload {
    Json(Value),
    Raw(String),
}

impl HostPayload {
    pub fn parse(data: &str) -> Self {
        match serde_json::from_str(data) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Raw(data.to_string()),
        }
    }
}

impl std::fmt::Display for HostPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(value) => write!(f, "{value}"),
            Self::Raw(text) => write!(f, "{text}"),
        }
    }
}

pub struct HostInvocation<'a> {
    pub url: &'a str,
    pub session_id: &'a str,
    pub prompt: &'a str,
    pub timeout: Duration,
}

/// Run one invocation, handing every decoded payload to `on_payload`.
/// Returns the number of payloads seen.
pub async fn invoke_host<F>(
    invocation: &HostInvocation<'_>,
    credentials: &dyn CredentialProvider,
    idp: &IdentityProviderConfig,
    mut on_payload: F,
) -> Result<usize>
where
    F: FnMut(HostPayload),
{
    let token = credentials
        .bearer_token(idp)
        .await
        .context("failed to obtain a bearer token")?;
    let http = authenticated_http_client(Some(&token), invocation.session_id, invocation.timeout)
        .context("failed to build the HTTP client")?;

    info!(url = %invocation.url, session_id = %invocation.session_id, "Invoking host");
    let resp = http
        .post(invocation.url)
        .json(&json!({ "prompt": invocation.prompt }))
        .send()
        .await
        .with_context(|| format!("request to {} failed", invocation.url))?;

    let status = resp.status();
    debug!(%status, "Host responded");
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("host returned {status}: {body}");
    }

    let is_sse = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    if !is_sse {
        let body = resp.text().await.context("failed to read response body")?;
        on_payload(HostPayload::parse(&body));
        return Ok(1);
    }

    let mut decoder = SseDecoder::new();
    let mut seen = 0;
    let mut chunks = resp.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.context("event stream interrupted")?;
        for data in decoder.push(&chunk) {
            seen += 1;
            on_payload(HostPayload::parse(&data));
        }
    }
    if let Some(data) = decoder.finish() {
        seen += 1;
        on_payload(HostPayload::parse(&data));
    }
    Ok(seen)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use triage_a2a::{ClientCredentialsProvider, SESSION_HEADER};

    fn idp() -> IdentityProviderConfig {
        serde_json::from_value(json!({
            "domain": "ops", "user_pool_id": "us-east-1_Pool", "client_id": "c",
            "client_secret": "s", "resource_server_identifier": "agents", "scopes": ["invoke"]
        }))
        .unwrap()
    }

    async fn host(headers: HeaderMap, body: String) -> impl IntoResponse {
        let authorized = headers.get("authorization").and_then(|v| v.to_str().ok())
            == Some("Bearer tok")
            && headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) == Some("s-9");
        if !authorized {
            return (axum::http::StatusCode::FORBIDDEN, "denied".to_string()).into_response();
        }
        let prompt = serde_json::from_str::<Value>(&body).unwrap()["prompt"].clone();
        let sse = format!(
            "data: {{\"type\":\"token\",\"text\":{prompt}}}\n\n: keep-alive\n\ndata: not json\n\n"
        );
        ([("content-type", "text/event-stream")], sse).into_response()
    }

    async fn spawn() -> String {
        let app = Router::new()
            .route(
                "/oauth2/token",
                post(|| async { axum::Json(json!({"access_token": "tok"})) }),
            )
            .route("/invocations", post(host));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        base
    }

    #[test]
    fn test_payload_parse() {
        assert_eq!(HostPayload::parse("{\"a\":1}"), HostPayload::Json(json!({"a": 1})));
        assert_eq!(HostPayload::parse("plain"), HostPayload::Raw("plain".to_string()));
    }

    #[tokio::test]
    async fn test_invoke_decodes_event_stream() {
        let base = spawn().await;
        let credentials = ClientCredentialsProvider::new().with_endpoint(format!("{base}/oauth2/token"));
        let url = format!("{base}/invocations");
        let invocation = HostInvocation {
            url: &url,
            session_id: "s-9",
            prompt: "list alarms",
            timeout: Duration::from_secs(10),
        };

        let mut payloads = Vec::new();
        let seen = invoke_host(&invocation, &credentials, &idp(), |p| payloads.push(p))
            .await
            .unwrap();

        assert_eq!(seen, 2);
        assert_eq!(
            payloads,
            vec![
                HostPayload::Json(json!({"type": "token", "text": "list alarms"})),
                HostPayload::Raw("not json".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_invoke_reports_rejection() {
        let base = spawn().await;
        let credentials = ClientCredentialsProvider::new().with_endpoint(format!("{base}/oauth2/token"));
        let url = format!("{base}/invocations");
        let invocation = HostInvocation {
            url: &url,
            session_id: "other-session",
            prompt: "list alarms",
            timeout: Duration::from_secs(10),
        };

        let err = invoke_host(&invocation, &credentials, &idp(), |_| {})
            .await
            .unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
