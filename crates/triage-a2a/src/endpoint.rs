//! AgentCore runtime URLs and request headers

use crate::protocol::AGENT_CARD_PATH;

/// Header carrying the caller's session id to the runtime
pub const SESSION_HEADER: &str = "X-Amzn-Bedrock-AgentCore-Runtime-Session-Id";

/// `https://bedrock-agentcore.{region}.amazonaws.com/runtimes/{arn}/invocations/`
///
/// The ARN is percent-encoded with no safe characters, so `:` and `/` are
/// escaped as well.
pub fn runtime_invocation_url(region: &str, runtime_arn: &str) -> String {
    format!(
        "https://bedrock-agentcore.{}.amazonaws.com/runtimes/{}/invocations/",
        region,
        urlencoding::encode(runtime_arn)
    )
}

/// Card location for an invocation base URL
pub fn agent_card_url(base_url: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), AGENT_CARD_PATH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_url_escapes_arn() {
        let url = runtime_invocation_url(
            "us-east-1",
            "arn:aws:bedrock-agentcore:us-east-1:123456789012:runtime/monitoring_agent-Af2Ij",
        );
        assert_eq!(
            url,
            "https://bedrock-agentcore.us-east-1.amazonaws.com/runtimes/\
             arn%3Aaws%3Abedrock-agentcore%3Aus-east-1%3A123456789012%3Aruntime%2Fmonitoring_agent-Af2Ij\
             /invocations/"
        );
    }

    #[test]
    fn test_agent_card_url_no_double_slash() {
        assert_eq!(
            agent_card_url("http://localhost:9000/invocations/"),
            "http://localhost:9000/invocations/.well-known/agent-card.json"
        );
        assert_eq!(
            agent_card_url("http://localhost:9000"),
            "http://localhost:9000/.well-known/agent-card.json"
        );
    }
}
