use serde::{Deserialize, Serialize};

use super::User;

/// Login credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Account email.
    pub email: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates credentials from an email and password.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Details for a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterDetails {
    /// Account email.
    pub email: String,
    /// Display name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl RegisterDetails {
    /// Creates registration details.
    pub fn new(
        email: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Result of a successful login, registration, or session check.
///
/// Older server paths answer with the bare user object while newer ones wrap it as
/// `{ "user": ..., "csrf_token": ... }`.  Both shapes deserialize into this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "AuthPayload")]
pub struct AuthResponse {
    /// The authenticated user.
    pub user: User,
    /// CSRF token issued alongside the session, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AuthPayload {
    Wrapped {
        user: User,
        #[serde(default)]
        csrf_token: Option<String>,
    },
    Bare(User),
}

impl From<AuthPayload> for AuthResponse {
    fn from(payload: AuthPayload) -> Self {
        match payload {
            AuthPayload::Wrapped { user, csrf_token } => AuthResponse { user, csrf_token },
            AuthPayload::Bare(user) => AuthResponse {
                user,
                csrf_token: None,
            },
        }
    }
}

/// Body of `GET /api/v1/auth/csrf-token`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsrfTokenResponse {
    /// The token value to send as `X-CSRF-Token`.
    pub csrf_token: String,
    /// Server issue time; the format varies by deployment so it is kept opaque.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
}
