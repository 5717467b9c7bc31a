//! One user-message to assistant-reply cycle.
//!
//! A [`StreamExchange`] is the observable record; an [`ExchangeHandle`] is what the caller holds.
//! The handle owns the cancellation token, so stopping is a property of the exchange and not
//! of whoever happened to start it.

use std::fmt;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::types::Message;

/// Why an exchange failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The connection dropped or timed out mid-reply.
    Interrupted,
    /// The server refused the request or aborted the reply.
    Rejected {
        /// HTTP status, when the refusal came with one.
        status: Option<u16>,
        /// Server-provided message.
        message: String,
    },
}

impl FailureKind {
    /// The text to show under a failed reply.
    pub fn user_message(&self) -> String {
        match self {
            FailureKind::Interrupted => "Response interrupted".to_string(),
            FailureKind::Rejected { message, .. } => message.clone(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Interrupted => write!(f, "interrupted"),
            FailureKind::Rejected {
                status: Some(status),
                message,
            } => write!(f, "rejected ({status}): {message}"),
            FailureKind::Rejected {
                status: None,
                message,
            } => write!(f, "rejected: {message}"),
        }
    }
}

/// Lifecycle of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStatus {
    /// Submitted; nothing received yet.
    Pending,
    /// At least one fragment received.
    Streaming,
    /// The server ended the reply normally.
    Complete,
    /// The user cancelled.
    Stopped,
    /// The reply could not be finished.
    Failed(FailureKind),
}

impl ExchangeStatus {
    /// Returns true for `Pending` and `Streaming`.
    pub fn is_active(&self) -> bool {
        matches!(self, ExchangeStatus::Pending | ExchangeStatus::Streaming)
    }

    /// Returns true once the exchange can no longer change.
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeStatus::Pending => write!(f, "pending"),
            ExchangeStatus::Streaming => write!(f, "streaming"),
            ExchangeStatus::Complete => write!(f, "complete"),
            ExchangeStatus::Stopped => write!(f, "stopped"),
            ExchangeStatus::Failed(_) => write!(f, "failed"),
        }
    }
}

/// Snapshot of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamExchange {
    /// Exchange identifier.
    pub id: String,
    /// Conversation the exchange belongs to.
    pub conversation_id: String,
    /// The persisted user message that started the exchange.
    pub user_message: Message,
    /// Assistant text received so far.
    pub assistant_draft: String,
    /// Current lifecycle state.
    pub status: ExchangeStatus,
    /// Id of the stored assistant message, once persisted.
    pub persisted_message_id: Option<String>,
}

impl StreamExchange {
    pub(crate) fn new(user_message: Message) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: user_message.conversation_id.clone(),
            user_message,
            assistant_draft: String::new(),
            status: ExchangeStatus::Pending,
            persisted_message_id: None,
        }
    }

    /// Returns true if the draft is in the conversation store.
    pub fn is_persisted(&self) -> bool {
        self.persisted_message_id.is_some()
    }

    /// Returns the failure, if the exchange failed.
    pub fn failure(&self) -> Option<&FailureKind> {
        match &self.status {
            ExchangeStatus::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Caller's handle on a running exchange.
///
/// Dropping the handle does not cancel the exchange.
#[derive(Debug, Clone)]
pub struct ExchangeHandle {
    id: String,
    conversation_id: String,
    cancel: CancellationToken,
    updates: watch::Receiver<StreamExchange>,
}

impl ExchangeHandle {
    pub(crate) fn new(
        exchange: &StreamExchange,
        cancel: CancellationToken,
        updates: watch::Receiver<StreamExchange>,
    ) -> Self {
        Self {
            id: exchange.id.clone(),
            conversation_id: exchange.conversation_id.clone(),
            cancel,
            updates,
        }
    }

    /// The exchange id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The conversation id.
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Requests cancellation.  Has no effect once the exchange is terminal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the latest snapshot.
    pub fn snapshot(&self) -> StreamExchange {
        self.updates.borrow().clone()
    }

    /// Returns a receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StreamExchange> {
        self.updates.clone()
    }

    /// Waits for the exchange to reach a terminal state and returns the final snapshot.
    pub async fn wait(&self) -> StreamExchange {
        let mut updates = self.updates.clone();
        loop {
            if updates.borrow_and_update().status.is_terminal() {
                return updates.borrow().clone();
            }
            if updates.changed().await.is_err() {
                // The task is gone; its last publish is final.
                return updates.borrow().clone();
            }
        }
    }
}
