//! Logging trait for Workbench client state changes.
//!
//! This module provides the [`ClientLogger`] trait that lets applications observe session
//! transitions, finished exchanges, and errors caught by the [`crate::ErrorBoundary`].

use tracing::{debug, error, info, warn};

use crate::exchange::{ExchangeStatus, StreamExchange};
use crate::session::AuthState;

/// A trait for logging Workbench client activity.
///
/// # Example
///
/// ```rust,ignore
/// use workbench::{AuthState, ClientLogger, StreamExchange};
/// use std::sync::Mutex;
///
/// struct Recorder {
///     errors: Mutex<Vec<String>>,
/// }
///
/// impl ClientLogger for Recorder {
///     fn log_session(&self, _: &AuthState) {}
///     fn log_exchange(&self, _: &StreamExchange) {}
///     fn report_error(&self, context: &str, error: &str) {
///         self.errors.lock().unwrap().push(format!("{context}: {error}"));
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Called after every session state transition.
    fn log_session(&self, state: &AuthState);

    /// Called once when an exchange reaches a terminal state.
    fn log_exchange(&self, exchange: &StreamExchange);

    /// Called for failures that are handled rather than surfaced: logout network errors,
    /// unpersisted drafts, and panics caught by an error boundary.
    ///
    /// `context` names where the failure happened (a component label or operation name).
    fn report_error(&self, context: &str, error: &str);
}

/// [`ClientLogger`] that emits `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl ClientLogger for TracingLogger {
    fn log_session(&self, state: &AuthState) {
        debug!(state = state.name(), "session transition");
    }

    fn log_exchange(&self, exchange: &StreamExchange) {
        match &exchange.status {
            ExchangeStatus::Failed(kind) => warn!(
                conversation_id = %exchange.conversation_id,
                exchange_id = %exchange.id,
                draft_len = exchange.assistant_draft.len(),
                failure = %kind,
                "exchange failed"
            ),
            status => info!(
                conversation_id = %exchange.conversation_id,
                exchange_id = %exchange.id,
                draft_len = exchange.assistant_draft.len(),
                status = %status,
                "exchange finished"
            ),
        }
    }

    fn report_error(&self, context: &str, error: &str) {
        error!(context, error, "handled error");
    }
}

/// [`ClientLogger`] that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl ClientLogger for NoopLogger {
    fn log_session(&self, _: &AuthState) {}

    fn log_exchange(&self, _: &StreamExchange) {}

    fn report_error(&self, _: &str, _: &str) {}
}
