use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Written by the signed-in user.
    User,
    /// Generated by the assistant.
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation tree.
///
/// Messages are never edited in place.  An edit produces a sibling that shares the
/// original's `parent_id`, which is how branches come about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier.
    #[serde(deserialize_with = "crate::utils::lenient::id")]
    pub id: String,

    /// Conversation the message belongs to.
    #[serde(deserialize_with = "crate::utils::lenient::id")]
    pub conversation_id: String,

    /// The message this one continues from; `None` for the first message.
    #[serde(
        default,
        deserialize_with = "crate::utils::lenient::optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,

    /// Author of the message.
    pub role: MessageRole,

    /// Message text.
    pub content: String,

    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Message {
    /// Creates a message with a fresh identifier stamped with the current time.
    pub fn new(
        conversation_id: impl Into<String>,
        parent_id: Option<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            parent_id,
            role,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}
