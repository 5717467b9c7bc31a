use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A conversation as returned by `POST /api/v1/conversations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server-assigned identifier.
    #[serde(deserialize_with = "crate::utils::lenient::id")]
    pub id: String,

    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Creation time, when the server reports one.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<OffsetDateTime>,
}

impl Conversation {
    /// Creates a conversation record with the given id.
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: id.into(),
            title,
            created_at: Some(OffsetDateTime::now_utc()),
        }
    }
}

/// Body of `POST /api/v1/conversations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateConversation {
    /// Optional title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Body of `POST /api/v1/conversations/{id}/stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// The user message text.
    pub content: String,
    /// The message the new user message continues from.
    pub parent_message_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_numeric_id() {
        let json = serde_json::json!({ "id": 12, "title": "Notes" });
        let conv: Conversation = serde_json::from_value(json).unwrap();
        assert_eq!(conv.id, "12");
        assert_eq!(conv.title.as_deref(), Some("Notes"));
        assert!(conv.created_at.is_none());
    }

    #[test]
    fn stream_request_serializes_null_parent() {
        let req = StreamRequest {
            content: "hello".to_string(),
            parent_message_id: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "content": "hello", "parent_message_id": null })
        );
    }
}
