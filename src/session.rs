//! Authentication session state.
//!
//! The session is a small finite-state machine.  [`transition`] is the only function that
//! produces a new [`AuthState`]; [`SessionStore`] owns the current state, runs the network
//! calls, and publishes every change through a `watch` channel.  Nothing else can write it.
//!
//! ```text
//! Anonymous --check/login/register--> Authenticating --ok--> Authenticated
//!                                     Authenticating --err-> AuthError
//! any state --logout--> Anonymous
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::capability::{Capability, has_capability};
use crate::client::Workbench;
use crate::client_logger::{ClientLogger, TracingLogger};
use crate::error::Error;
use crate::observability::{
    AUTH_FAILURES, AUTH_LOGOUT_ERRORS, AUTH_LOGOUTS, AUTH_STALE_RESULTS, AUTH_SUCCESSES,
};
use crate::types::{AuthResponse, Credentials, RegisterDetails, User};

/// States of the authentication machine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthState {
    /// No user is signed in.
    #[default]
    Anonymous,
    /// An auth call is in flight.  `silent` calls do not show a loading indicator.
    Authenticating {
        /// True for the automatic start-up check.
        silent: bool,
    },
    /// A user is signed in.
    Authenticated(User),
    /// The last explicit attempt failed; equivalent to `Anonymous` for authorization.
    AuthError(String),
}

impl AuthState {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Anonymous => "anonymous",
            AuthState::Authenticating { .. } => "authenticating",
            AuthState::Authenticated(_) => "authenticated",
            AuthState::AuthError(_) => "auth_error",
        }
    }
}

/// Inputs to the authentication machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// An auth call started.
    Start {
        /// True for the automatic start-up check.
        silent: bool,
    },
    /// An auth call returned a user.
    Success(User),
    /// An explicit auth call failed with a user-facing message.
    Failure(String),
    /// The user signed out, or a session check found no session.
    Logout,
    /// The user dismissed the error.
    ClearError,
}

/// The pure transition function.
pub fn transition(state: &AuthState, event: AuthEvent) -> AuthState {
    match (state, event) {
        (_, AuthEvent::Start { silent }) => AuthState::Authenticating { silent },
        (_, AuthEvent::Success(user)) => AuthState::Authenticated(user),
        (_, AuthEvent::Failure(message)) => AuthState::AuthError(message),
        (_, AuthEvent::Logout) => AuthState::Anonymous,
        (AuthState::AuthError(_), AuthEvent::ClearError) => AuthState::Anonymous,
        (other, AuthEvent::ClearError) => other.clone(),
    }
}

/// Read-only view of the session, as a UI would consume it.
///
/// Built from an [`AuthState`], so `is_authenticated == user.is_some()` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Session {
    /// The signed-in user.
    pub user: Option<User>,
    /// Whether a user is signed in.
    pub is_authenticated: bool,
    /// Whether an explicit auth call is in flight.
    pub is_loading: bool,
    /// The last auth error, until dismissed or a new attempt starts.
    pub error: Option<String>,
}

impl From<&AuthState> for Session {
    fn from(state: &AuthState) -> Self {
        match state {
            AuthState::Anonymous => Session::default(),
            AuthState::Authenticating { silent } => Session {
                is_loading: !silent,
                ..Session::default()
            },
            AuthState::Authenticated(user) => Session {
                user: Some(user.clone()),
                is_authenticated: true,
                ..Session::default()
            },
            AuthState::AuthError(message) => Session {
                error: Some(message.clone()),
                ..Session::default()
            },
        }
    }
}

/// Owner of the authentication state.
///
/// Auth calls are not serialized against each other, but [`logout`](Self::logout) always
/// wins: any call that was in flight when it ran has its result discarded.
pub struct SessionStore {
    client: Workbench,
    state: watch::Sender<AuthState>,
    generation: AtomicU64,
    rehydrated: AtomicBool,
    logger: Arc<dyn ClientLogger>,
}

impl SessionStore {
    /// Creates an anonymous session store.
    pub fn new(client: Workbench) -> Self {
        Self::with_logger(client, Arc::new(TracingLogger))
    }

    /// Creates an anonymous session store reporting to `logger`.
    pub fn with_logger(client: Workbench, logger: Arc<dyn ClientLogger>) -> Self {
        let (state, _) = watch::channel(AuthState::Anonymous);
        Self {
            client,
            state,
            generation: AtomicU64::new(0),
            rehydrated: AtomicBool::new(false),
            logger,
        }
    }

    /// Returns the API client this store authenticates.
    pub fn client(&self) -> &Workbench {
        &self.client
    }

    /// Returns the current state.
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    /// Returns the current session view.
    pub fn snapshot(&self) -> Session {
        Session::from(&*self.state.borrow())
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Returns the signed-in user, if any.
    pub fn user(&self) -> Option<User> {
        match &*self.state.borrow() {
            AuthState::Authenticated(user) => Some(user.clone()),
            _ => None,
        }
    }

    /// Returns true if a user is signed in.
    pub fn is_authenticated(&self) -> bool {
        matches!(&*self.state.borrow(), AuthState::Authenticated(_))
    }

    /// Returns true if the signed-in user holds `capability`.  Anonymous sessions hold nothing.
    pub fn can(&self, capability: Capability) -> bool {
        match &*self.state.borrow() {
            AuthState::Authenticated(user) => has_capability(user, capability),
            _ => false,
        }
    }

    /// The automatic start-up check.  Runs at most once per store and never shows loading.
    pub async fn rehydrate(&self) {
        if self.rehydrated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.check(true).await;
    }

    /// An explicit, user-triggered session check.
    pub async fn check_auth(&self) {
        self.check(false).await;
    }

    /// Signs in.  Returns true on success; failures land in [`Session::error`].
    pub async fn login(&self, credentials: &Credentials) -> bool {
        let generation = self.begin(false);
        let result = self.client.login(credentials).await;
        self.finish_attempt(generation, "login", result).await
    }

    /// Creates an account and signs in.  Same contract as [`login`](Self::login).
    pub async fn register(&self, details: &RegisterDetails) -> bool {
        let generation = self.begin(false);
        let result = self.client.register(details).await;
        self.finish_attempt(generation, "register", result).await
    }

    /// Signs out.
    ///
    /// Local state becomes anonymous immediately; the server call runs afterwards and its
    /// failure is only logged.
    pub async fn logout(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        AUTH_LOGOUTS.click();
        self.dispatch(AuthEvent::Logout);
        if let Err(err) = self.client.logout().await {
            AUTH_LOGOUT_ERRORS.click();
            warn!(error = %err, "logout request failed; local session already cleared");
            self.logger.report_error("logout", &err.to_string());
        }
    }

    /// Dismisses the current error.  A no-op when there is none.
    pub fn clear_error(&self) {
        self.dispatch(AuthEvent::ClearError);
    }

    async fn check(&self, silent: bool) {
        let generation = self.begin(silent);
        let result = self.client.current_user().await;
        if self.is_stale(generation, "session check") {
            return;
        }
        match result {
            Ok(auth) => {
                self.adopt(generation, "session check", auth).await;
            }
            Err(err) => {
                // No session is not an error worth showing.
                debug!(error = %err, "session check found no session");
                self.dispatch(AuthEvent::Logout);
            }
        }
    }

    fn begin(&self, silent: bool) -> u64 {
        let generation = self.generation.load(Ordering::SeqCst);
        self.dispatch(AuthEvent::Start { silent });
        generation
    }

    async fn finish_attempt(
        &self,
        generation: u64,
        operation: &str,
        result: Result<AuthResponse, Error>,
    ) -> bool {
        if self.is_stale(generation, operation) {
            return false;
        }
        match result {
            Ok(auth) => self.adopt(generation, operation, auth).await,
            Err(err) => {
                AUTH_FAILURES.click();
                debug!(operation, error = %err, "authentication failed");
                self.dispatch(AuthEvent::Failure(err.user_message()));
                false
            }
        }
    }

    /// Seeds the returned CSRF token and signs the user in, unless a logout got there first.
    async fn adopt(&self, generation: u64, operation: &str, auth: AuthResponse) -> bool {
        if let Some(token) = &auth.csrf_token {
            self.client.csrf().seed(token.clone()).await;
        }
        if self.is_stale(generation, operation) {
            // A logout that ran during the seed must not leave this token behind.
            if let Some(token) = &auth.csrf_token {
                self.client.csrf().forget(token).await;
            }
            return false;
        }
        AUTH_SUCCESSES.click();
        self.dispatch(AuthEvent::Success(auth.user));
        true
    }

    fn is_stale(&self, generation: u64, operation: &str) -> bool {
        let stale = self.generation.load(Ordering::SeqCst) != generation;
        if stale {
            AUTH_STALE_RESULTS.click();
            debug!(operation, "discarding auth result that finished after logout");
        }
        stale
    }

    fn dispatch(&self, event: AuthEvent) {
        let changed = self.state.send_if_modified(|state| {
            let next = transition(state, event);
            if next == *state {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            self.logger.log_session(&self.state.borrow());
        }
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.borrow())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
