//! Role-based capabilities.
//!
//! A user's role string is resolved once into a closed [`Role`], and every permission question
//! is answered by [`has_capability`], an exhaustive match.  Unrecognised roles grant nothing.

use std::fmt;
use std::str::FromStr;

use crate::types::User;

/// The closed set of roles the client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Regular account.
    Member,
    /// Read-only account.
    Viewer,
    /// A role string the client does not recognise.
    Unknown,
}

impl Role {
    /// Resolves a user's role.  Users without a role are members.
    pub fn of(user: &User) -> Role {
        match user.role.as_deref() {
            None => Role::Member,
            Some(role) => role.parse().unwrap_or(Role::Unknown),
        }
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" | "administrator" => Ok(Role::Admin),
            "member" | "user" => Ok(Role::Member),
            "viewer" | "readonly" | "read-only" => Ok(Role::Viewer),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Member => write!(f, "member"),
            Role::Viewer => write!(f, "viewer"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

/// Things a user may be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Read conversations and their messages.
    ReadConversations,
    /// Create conversations.
    CreateConversations,
    /// Submit messages and receive streamed replies.
    SendMessages,
    /// Edit earlier user messages, creating branches.
    EditMessages,
    /// Use semantic search.
    Search,
    /// Manage other users.
    ManageUsers,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 6] = [
        Capability::ReadConversations,
        Capability::CreateConversations,
        Capability::SendMessages,
        Capability::EditMessages,
        Capability::Search,
        Capability::ManageUsers,
    ];
}

/// Answers whether `user` holds `capability`.
pub fn has_capability(user: &User, capability: Capability) -> bool {
    role_has_capability(Role::of(user), capability)
}

/// Answers whether `role` holds `capability`.
pub fn role_has_capability(role: Role, capability: Capability) -> bool {
    use Capability::*;
    match (role, capability) {
        (Role::Admin, _) => true,
        (Role::Member, ReadConversations)
        | (Role::Member, CreateConversations)
        | (Role::Member, SendMessages)
        | (Role::Member, EditMessages)
        | (Role::Member, Search) => true,
        (Role::Member, ManageUsers) => false,
        (Role::Viewer, ReadConversations) | (Role::Viewer, Search) => true,
        (Role::Viewer, CreateConversations)
        | (Role::Viewer, SendMessages)
        | (Role::Viewer, EditMessages)
        | (Role::Viewer, ManageUsers) => false,
        (Role::Unknown, _) => false,
    }
}
