// Public modules
pub mod auth;
pub mod conversation;
pub mod message;
pub mod search;
pub mod user;

// Re-exports
pub use auth::{AuthResponse, Credentials, CsrfTokenResponse, RegisterDetails};
pub use conversation::{Conversation, CreateConversation, StreamRequest};
pub use message::{Message, MessageRole};
pub use search::{SearchHit, SearchParams, SearchResults};
pub use user::User;
