// Public modules
pub mod boundary;
pub mod capability;
pub mod chat;
pub mod client;
pub mod client_logger;
pub mod config;
pub mod controller;
pub mod conversation;
pub mod csrf;
pub mod error;
pub mod exchange;
pub mod render;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;
pub mod utils;

mod observability;

// Re-exports
pub use boundary::{BoundaryOutcome, ErrorBoundary, RecoveryAction};
pub use capability::{Capability, Role, has_capability, role_has_capability};
pub use client::Workbench;
pub use client_logger::{ClientLogger, NoopLogger, TracingLogger};
pub use config::ClientConfig;
pub use controller::StreamingChatController;
pub use conversation::{BranchRetention, ConversationStore, MemoryConversationStore};
pub use csrf::{CSRF_HEADER, CsrfGuard, CsrfToken};
pub use error::{CSRF_VALIDATION_FAILED, Error, Result};
pub use exchange::{ExchangeHandle, ExchangeStatus, FailureKind, StreamExchange};
pub use observability::register_biometrics;
pub use render::{DraftCursor, PlainTextRenderer, Renderer};
pub use session::{AuthEvent, AuthState, Session, SessionStore, transition};
pub use sse::{StreamEvent, process_sse};
pub use transport::{ByteStream, HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use types::*;
