//! Persistent message types owned by the main app.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// A structured event belonging to a turn.
///
/// Only the `type` discriminator is interpreted. All other fields are kept
/// verbatim so backend-specific items (tool calls, file changes, reasoning)
/// survive the round trip to the main app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl TurnItem {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Attach a field, replacing any previous value under the same key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// The `error` item recorded when a turn fails.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new("error").with("message", message.into())
    }

    /// The `agent_message` item summarizing an assistant reply.
    pub fn agent_message(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new("agent_message")
            .with("id", id.into())
            .with("text", text.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Interpret an arbitrary JSON value as a turn item.
    ///
    /// Returns `None` unless the value is an object with a string `type`.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return None,
        };
        Some(Self { kind, fields })
    }
}

/// File attached to a stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttachment {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub url: String,
    pub relative_path: String,
}

/// A message as stored by the main app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<MessageAttachment>,
    #[serde(default)]
    pub items: Vec<TurnItem>,
    pub responder_provider: Option<String>,
    pub responder_model: Option<String>,
    pub responder_reasoning_effort: Option<String>,
    pub created_at: String,
}

/// Attachment reference in an outgoing webhook payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAttachment {
    pub filename: String,
    pub mime_type: String,
    pub size: u64,
    pub relative_path: String,
}

/// Which backend produced an assistant message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Responder {
    pub provider: String,
    pub model: String,
    pub reasoning_effort: String,
}

/// Body of `POST /api/container-webhooks/{session}/message`.
///
/// The main app assigns `id` and `createdAt`. Responder fields serialize as
/// explicit `null` for user messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookMessagePayload {
    pub role: MessageRole,
    pub content: String,
    pub attachments: Vec<WebhookAttachment>,
    pub items: Vec<TurnItem>,
    pub responder_provider: Option<String>,
    pub responder_model: Option<String>,
    pub responder_reasoning_effort: Option<String>,
}

impl WebhookMessagePayload {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            attachments: Vec::new(),
            items: Vec::new(),
            responder_provider: None,
            responder_model: None,
            responder_reasoning_effort: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        items: Vec<TurnItem>,
        responder: &Responder,
    ) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            attachments: Vec::new(),
            items,
            responder_provider: Some(responder.provider.clone()),
            responder_model: Some(responder.model.clone()),
            responder_reasoning_effort: Some(responder.reasoning_effort.clone()),
        }
    }
}

/// Identifier and timestamp the main app assigned to a posted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedMessage {
    pub id: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_turn_item_flattens_extra_fields() {
        let item = TurnItem::new("command_execution")
            .with("command", "ls -la")
            .with("exit_code", 0);
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(
            value,
            json!({"type": "command_execution", "command": "ls -la", "exit_code": 0})
        );

        let parsed: TurnItem = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, item);
    }

    #[test]
    fn test_turn_item_from_value_requires_type() {
        assert!(TurnItem::from_value(json!({"text": "hi"})).is_none());
        assert!(TurnItem::from_value(json!("text")).is_none());
        assert!(TurnItem::from_value(json!({"type": 3})).is_none());

        let item = TurnItem::from_value(json!({"type": "file_change", "path": "a.rs"})).unwrap();
        assert_eq!(item.kind, "file_change");
        assert_eq!(item.get("path"), Some(&json!("a.rs")));
    }

    #[test]
    fn test_error_item_shape() {
        let value = serde_json::to_value(TurnItem::error("boom")).unwrap();
        assert_eq!(value, json!({"type": "error", "message": "boom"}));
    }

    #[test]
    fn test_user_payload_serializes_null_responder() {
        let value = serde_json::to_value(WebhookMessagePayload::user("fix bug")).unwrap();
        assert_eq!(
            value,
            json!({
                "role": "user",
                "content": "fix bug",
                "attachments": [],
                "items": [],
                "responderProvider": null,
                "responderModel": null,
                "responderReasoningEffort": null,
            })
        );
    }

    #[test]
    fn test_assistant_payload_carries_responder() {
        let responder = Responder {
            provider: "DroidCLI".to_string(),
            model: "m1".to_string(),
            reasoning_effort: "medium".to_string(),
        };
        let payload =
            WebhookMessagePayload::assistant("done", vec![TurnItem::new("x")], &responder);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["responderProvider"], "DroidCLI");
        assert_eq!(value["responderModel"], "m1");
        assert_eq!(value["responderReasoningEffort"], "medium");
        assert_eq!(value["items"][0]["type"], "x");
    }

    #[test]
    fn test_message_deserializes_main_app_shape() {
        let message: Message = serde_json::from_value(json!({
            "id": "msg_1",
            "sessionId": "sess_1",
            "role": "assistant",
            "content": "hello",
            "attachments": [],
            "items": [{"type": "agent_message", "id": "a", "text": "hello"}],
            "responderProvider": "CodexSDK",
            "responderModel": null,
            "responderReasoningEffort": "high",
            "createdAt": "2025-01-01T00:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(message.role, MessageRole::Assistant);
        assert_eq!(message.items.len(), 1);
        assert_eq!(message.responder_model, None);
    }
}
