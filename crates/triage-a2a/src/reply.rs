//! Reply envelopes and answer extraction
//!
//! A remote agent answers either with a bare [`Message`] or with a [`Task`]
//! (optionally followed by update events). Shapes are told apart by the
//! `kind` discriminator, or by their required keys when `kind` is absent.

use serde::Serialize;
use serde_json::Value;

use crate::error::ProtocolDecodeError;
use crate::protocol::{
    KIND_ARTIFACT_UPDATE, KIND_MESSAGE, KIND_STATUS_UPDATE, KIND_TASK, Message, Part, Role, Task,
    TaskArtifactUpdateEvent, TaskState, TaskStatusUpdateEvent, UpdateEvent,
};

/// One item yielded by a bound client's `send_message`
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Message(Message),
    Task(Task, Option<UpdateEvent>),
    /// A `result` that is neither a message nor a task, kept verbatim
    Raw(Value),
}

/// A decoded JSON-RPC `result` payload
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    Message(Message),
    Task(Task),
    Update(UpdateEvent),
}

impl WireEvent {
    pub fn decode(value: Value) -> Result<Self, ProtocolDecodeError> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .map(str::to_string)
            .or_else(|| infer_kind(&value).map(str::to_string))
            .ok_or_else(|| ProtocolDecodeError::new("result has no recognisable shape"))?;

        let decoded = match kind.as_str() {
            KIND_MESSAGE => serde_json::from_value::<Message>(value).map(Self::Message),
            KIND_TASK => serde_json::from_value::<Task>(value).map(Self::Task),
            KIND_STATUS_UPDATE => serde_json::from_value::<TaskStatusUpdateEvent>(value)
                .map(|e| Self::Update(UpdateEvent::Status(e))),
            KIND_ARTIFACT_UPDATE => serde_json::from_value::<TaskArtifactUpdateEvent>(value)
                .map(|e| Self::Update(UpdateEvent::Artifact(e))),
            other => {
                return Err(ProtocolDecodeError::new(format!(
                    "unknown result kind '{other}'"
                )));
            }
        };
        decoded.map_err(|e| ProtocolDecodeError::new(format!("malformed {kind}: {e}")))
    }
}

fn infer_kind(value: &Value) -> Option<&'static str> {
    let has = |key: &str| value.get(key).is_some();
    if has("messageId") && has("role") && has("parts") {
        Some(KIND_MESSAGE)
    } else if has("id") && has("status") {
        Some(KIND_TASK)
    } else if has("taskId") && has("artifact") {
        Some(KIND_ARTIFACT_UPDATE)
    } else if has("taskId") && has("status") {
        Some(KIND_STATUS_UPDATE)
    } else {
        None
    }
}

/// Final reply from one remote agent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Message(Message),
    TaskUpdate {
        task: Task,
        #[serde(skip_serializing_if = "Option::is_none")]
        update: Option<UpdateEvent>,
    },
    RawFallback { raw: Value },
}

impl From<ClientEvent> for Reply {
    fn from(event: ClientEvent) -> Self {
        match event {
            ClientEvent::Message(message) => Self::Message(message),
            ClientEvent::Task(task, update) => Self::TaskUpdate { task, update },
            ClientEvent::Raw(raw) => Self::RawFallback { raw },
        }
    }
}

impl Reply {
    /// Decode an arbitrary JSON reply; anything that is neither a message
    /// nor a task is kept verbatim as [`Reply::RawFallback`]
    pub fn from_value(value: Value) -> Self {
        match WireEvent::decode(value.clone()) {
            Ok(WireEvent::Message(message)) => Self::Message(message),
            Ok(WireEvent::Task(task)) => Self::TaskUpdate { task, update: None },
            Ok(WireEvent::Update(_)) | Err(_) => Self::RawFallback { raw: value },
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::TaskUpdate { task, .. } => Some(task),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<TaskState> {
        self.task().map(|t| t.status.state)
    }

    /// The canonical answer text.
    ///
    /// Tasks answer with `artifacts[0].parts[0]`; without artifacts the text
    /// of every agent-role history message is concatenated in order.
    pub fn answer_text(&self) -> Result<String, ProtocolDecodeError> {
        let text = match self {
            Self::Message(message) => {
                let text = message.text();
                if text.is_empty() {
                    message.parts.iter().map(Part::render).collect()
                } else {
                    text
                }
            }
            Self::TaskUpdate { task, .. } => task_answer_text(task).unwrap_or_default(),
            Self::RawFallback { raw } => raw_answer_text(raw).unwrap_or_default(),
        };

        if text.trim().is_empty() {
            Err(ProtocolDecodeError::new(
                "reply has neither an artifact nor agent history text",
            ))
        } else {
            Ok(text)
        }
    }
}

/// `artifacts[0].parts[0]`, else the concatenated agent history
pub fn task_answer_text(task: &Task) -> Option<String> {
    if let Some(part) = task.artifacts.first().and_then(|a| a.parts.first()) {
        let text = part.render();
        if !text.is_empty() {
            return Some(text);
        }
    }

    let history: String = task
        .history
        .iter()
        .filter(|m| m.role == Role::Agent)
        .map(Message::text)
        .collect();
    (!history.is_empty()).then_some(history)
}

/// Same preference order, applied to an undecoded JSON value
fn raw_answer_text(raw: &Value) -> Option<String> {
    if let Some(text) = raw.as_str() {
        return Some(text.to_string());
    }
    if let Some(text) = raw
        .pointer("/artifacts/0/parts/0/text")
        .and_then(|v| v.as_str())
    {
        return Some(text.to_string());
    }
    if let Some(history) = raw.get("history").and_then(|h| h.as_array()) {
        let text: String = history
            .iter()
            .filter(|m| m.get("role").and_then(|r| r.as_str()) == Some("agent"))
            .filter_map(|m| m.get("parts").and_then(|p| p.as_array()))
            .flatten()
            .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
            .collect();
        if !text.is_empty() {
            return Some(text);
        }
    }
    raw.get("text")
        .and_then(|t| t.as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Artifact, TaskStatus};
    use serde_json::json;

    fn task(artifacts: Vec<Artifact>, history: Vec<Message>) -> Task {
        Task {
            kind: "task".to_string(),
            id: "t1".to_string(),
            context_id: "c1".to_string(),
            status: TaskStatus {
                state: TaskState::Completed,
                message: None,
                timestamp: Some("2025-11-09T10:00:00Z".to_string()),
            },
            history,
            artifacts,
            metadata: None,
        }
    }

    fn artifact(text: &str) -> Artifact {
        Artifact {
            artifact_id: "a1".to_string(),
            name: None,
            parts: vec![Part::text(text)],
        }
    }

    #[test]
    fn test_prefers_first_artifact_part() {
        let t = task(
            vec![artifact("final answer"), artifact("second")],
            vec![Message::agent("thinking...")],
        );
        let reply = Reply::TaskUpdate { task: t, update: None };
        assert_eq!(reply.answer_text().unwrap(), "final answer");
    }

    #[test]
    fn test_falls_back_to_agent_history_in_order() {
        let t = task(
            vec![],
            vec![
                Message::user("check lambda logs"),
                Message::agent("Found 3 errors. "),
                Message::user("ignored"),
                Message::agent("Ticket OPS-12 created."),
            ],
        );
        let reply = Reply::TaskUpdate { task: t, update: None };
        assert_eq!(
            reply.answer_text().unwrap(),
            "Found 3 errors. Ticket OPS-12 created."
        );
    }

    #[test]
    fn test_empty_task_is_decode_error() {
        let t = task(vec![], vec![Message::user("only the question")]);
        let reply = Reply::TaskUpdate { task: t, update: None };
        assert!(reply.answer_text().is_err());
    }

    #[test]
    fn test_message_reply_text() {
        let reply = Reply::Message(Message::agent("all clear"));
        assert_eq!(reply.answer_text().unwrap(), "all clear");
        assert!(reply.task().is_none());
    }

    #[test]
    fn test_wire_event_by_kind() {
        let msg = json!({"kind":"message","messageId":"m","role":"agent","parts":[{"kind":"text","text":"x"}]});
        assert!(matches!(WireEvent::decode(msg), Ok(WireEvent::Message(_))));

        let update = json!({
            "kind":"status-update","taskId":"t1","contextId":"c1",
            "status":{"state":"working"},"final":false
        });
        match WireEvent::decode(update).unwrap() {
            WireEvent::Update(u) => assert_eq!(u.task_id(), "t1"),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[test]
    fn test_wire_event_inferred_without_kind() {
        let t = json!({"id":"t9","contextId":"c","status":{"state":"completed"}});
        match WireEvent::decode(t).unwrap() {
            WireEvent::Task(task) => assert_eq!(task.id, "t9"),
            other => panic!("expected task, got {:?}", other),
        }
    }

    #[test]
    fn test_wire_event_rejects_unknown_shape() {
        assert!(WireEvent::decode(json!({"foo": 1})).is_err());
        assert!(WireEvent::decode(json!({"kind": "bogus"})).is_err());
        assert!(WireEvent::decode(json!({"kind": "task", "id": 3})).is_err());
    }

    #[test]
    fn test_raw_fallback_history_heuristic() {
        let raw = json!({
            "history": [
                {"role": "user", "parts": [{"text": "q"}]},
                {"role": "agent", "parts": [{"text": "a1"}, {"text": "a2"}]}
            ]
        });
        let reply = Reply::from_value(raw);
        assert!(matches!(reply, Reply::RawFallback { .. }));
        assert_eq!(reply.answer_text().unwrap(), "a1a2");
    }

    #[test]
    fn test_raw_fallback_empty_is_error() {
        let reply = Reply::from_value(json!({"unrelated": true}));
        assert!(reply.answer_text().is_err());
    }

    #[test]
    fn test_reply_serializes_tagged() {
        let reply = Reply::Message(Message::agent("ok"));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "agent");
    }
}
