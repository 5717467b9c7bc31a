//! Top-level error boundary for rendering.
//!
//! [`ErrorBoundary::render`] runs a rendering closure and turns a panic into a recoverable
//! outcome, so one broken view cannot take the shell down with it.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::client_logger::ClientLogger;
use crate::observability::BOUNDARY_RECOVERIES;

/// What the user may do after a recovered failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Render the same view again.
    Retry,
    /// Throw away client state and start over.
    Reload,
}

/// Result of rendering inside a boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundaryOutcome<T> {
    /// The view rendered normally.
    Rendered(T),
    /// The view failed; show `message` and offer `actions`.
    Recovered {
        /// Generic text for the user.
        message: String,
        /// Offered recovery actions.
        actions: Vec<RecoveryAction>,
    },
}

impl<T> BoundaryOutcome<T> {
    /// Returns the rendered value, if any.
    pub fn rendered(self) -> Option<T> {
        match self {
            BoundaryOutcome::Rendered(value) => Some(value),
            BoundaryOutcome::Recovered { .. } => None,
        }
    }

    /// Returns true if the boundary caught a failure.
    pub fn is_recovered(&self) -> bool {
        matches!(self, BoundaryOutcome::Recovered { .. })
    }
}

/// Catches panics from a labelled part of the UI.
pub struct ErrorBoundary {
    component: String,
    logger: Arc<dyn ClientLogger>,
}

impl ErrorBoundary {
    /// Text shown after a recovered failure.
    pub const MESSAGE: &'static str = "Something went wrong while displaying this view.";

    /// Creates a boundary.  `component` names the wrapped view in error reports.
    pub fn new(component: impl Into<String>, logger: Arc<dyn ClientLogger>) -> Self {
        Self {
            component: component.into(),
            logger,
        }
    }

    /// Returns a boundary for a child view, reporting as `parent/child`.
    pub fn child(&self, component: &str) -> Self {
        Self {
            component: format!("{}/{component}", self.component),
            logger: Arc::clone(&self.logger),
        }
    }

    /// The component path used in reports.
    pub fn component(&self) -> &str {
        &self.component
    }

    /// Runs `view`.  A panic is reported and converted into [`BoundaryOutcome::Recovered`].
    pub fn render<T>(&self, view: impl FnOnce() -> T) -> BoundaryOutcome<T> {
        match catch_unwind(AssertUnwindSafe(view)) {
            Ok(value) => BoundaryOutcome::Rendered(value),
            Err(payload) => {
                BOUNDARY_RECOVERIES.click();
                let reason = panic_message(payload.as_ref());
                self.logger.report_error(&self.component, &reason);
                BoundaryOutcome::Recovered {
                    message: Self::MESSAGE.to_string(),
                    actions: vec![RecoveryAction::Retry, RecoveryAction::Reload],
                }
            }
        }
    }
}

impl std::fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::exchange::StreamExchange;
    use crate::session::AuthState;

    #[derive(Default)]
    struct Recorder {
        errors: Mutex<Vec<(String, String)>>,
    }

    impl ClientLogger for Recorder {
        fn log_session(&self, _: &AuthState) {}
        fn log_exchange(&self, _: &StreamExchange) {}
        fn report_error(&self, context: &str, error: &str) {
            self.errors
                .lock()
                .unwrap()
                .push((context.to_string(), error.to_string()));
        }
    }

    #[test]
    fn passes_through_success() {
        let boundary = ErrorBoundary::new("app", Arc::new(Recorder::default()));
        assert_eq!(boundary.render(|| 7).rendered(), Some(7));
    }

    #[test]
    fn recovers_and_reports() {
        let recorder = Arc::new(Recorder::default());
        let boundary = ErrorBoundary::new("app", recorder.clone()).child("sidebar");
        let outcome: BoundaryOutcome<()> = boundary.render(|| panic!("bad markdown"));
        match outcome {
            BoundaryOutcome::Recovered { actions, .. } => {
                assert_eq!(actions, vec![RecoveryAction::Retry, RecoveryAction::Reload]);
            }
            BoundaryOutcome::Rendered(_) => panic!("expected recovery"),
        }
        let errors = recorder.errors.lock().unwrap();
        assert_eq!(errors[0].0, "app/sidebar");
        assert_eq!(errors[0].1, "bad markdown");
    }

    #[test]
    fn retry_after_recovery() {
        let boundary = ErrorBoundary::new("app", Arc::new(Recorder::default()));
        let mut attempts = 0;
        let mut view = || {
            attempts += 1;
            if attempts == 1 {
                panic!("first render fails");
            }
            attempts
        };
        assert!(boundary.render(&mut view).is_recovered());
        assert_eq!(boundary.render(&mut view).rendered(), Some(2));
    }
}
