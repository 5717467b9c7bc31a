use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// An authenticated account as reported by the server.
///
/// The client never edits a `User`; it is replaced wholesale whenever an auth operation
/// succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-assigned identifier.
    #[serde(deserialize_with = "crate::utils::lenient::id")]
    pub id: String,

    /// Email address used to sign in.
    pub email: String,

    /// Display name.
    pub username: String,

    /// Role string as sent by the server; see [`crate::Role`] for the resolved form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Creation time of the account.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last modification time of the account.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}
