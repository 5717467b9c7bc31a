//! The streaming chat controller.
//!
//! [`StreamingChatController`] runs one exchange per conversation at a time.  The active map is
//! checked and claimed synchronously before the first `await`, so a second `submit` for the same
//! conversation is rejected with [`Error::ExchangeActive`] instead of being queued.  Exchanges in
//! different conversations are independent tasks.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::Capability;
use crate::client::Workbench;
use crate::client_logger::{ClientLogger, TracingLogger};
use crate::conversation::{BranchRetention, ConversationStore};
use crate::error::{Error, Result};
use crate::exchange::{ExchangeHandle, ExchangeStatus, FailureKind, StreamExchange};
use crate::observability::{
    EXCHANGES_COMPLETED, EXCHANGES_FAILED, EXCHANGES_REJECTED, EXCHANGES_STARTED,
    EXCHANGES_STOPPED, STREAM_BYTES, STREAM_CHUNKS, STREAM_DURATION, STREAM_TTFB,
};
use crate::session::SessionStore;
use crate::sse::{StreamEvent, process_sse};
use crate::types::{MessageRole, StreamRequest};

struct ActiveExchange {
    ticket: u64,
    cancel: CancellationToken,
}

/// Drives streamed replies for every conversation.
///
/// Cloning is cheap; clones share the active-exchange map.
#[derive(Clone)]
pub struct StreamingChatController {
    client: Workbench,
    session: Arc<SessionStore>,
    store: Arc<dyn ConversationStore>,
    logger: Arc<dyn ClientLogger>,
    retention: BranchRetention,
    tickets: Arc<AtomicU64>,
    active: Arc<Mutex<HashMap<String, ActiveExchange>>>,
}

impl StreamingChatController {
    /// Creates a controller.  Branch retention comes from the client's configuration.
    pub fn new(session: Arc<SessionStore>, store: Arc<dyn ConversationStore>) -> Self {
        let client = session.client().clone();
        let retention = client.config().branch_retention;
        Self {
            client,
            session,
            store,
            logger: Arc::new(TracingLogger),
            retention,
            tickets: Arc::new(AtomicU64::new(0)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replaces the logger.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Replaces the branch retention policy.
    pub fn with_retention(mut self, retention: BranchRetention) -> Self {
        self.retention = retention;
        self
    }

    /// The branch retention policy in force.
    pub fn retention(&self) -> BranchRetention {
        self.retention
    }

    /// The conversation store this controller writes to.
    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    /// Sends `content` as a reply to the conversation's active leaf.
    ///
    /// Fails with [`Error::ExchangeActive`] if the conversation already has a running exchange,
    /// and with a validation error for blank content.  Neither case touches the network.
    pub async fn submit(&self, conversation_id: &str, content: &str) -> Result<ExchangeHandle> {
        let content = validate_content(content)?;
        self.authorize(Capability::SendMessages)?;
        let reservation = self.reserve(conversation_id)?;
        let parent = match self.store.leaf(conversation_id).await {
            Ok(leaf) => leaf.map(|m| m.id),
            Err(err) if err.is_not_found() => None,
            Err(err) => {
                self.release(conversation_id, reservation.ticket);
                return Err(err);
            }
        };
        self.start(conversation_id, parent, content, reservation, None)
            .await
    }

    /// Edits an earlier user message by branching from its parent.
    ///
    /// The original message is left untouched.  Returns `Ok(None)` when the content is
    /// unchanged, in which case nothing is sent.
    pub async fn edit(
        &self,
        conversation_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<Option<ExchangeHandle>> {
        let content = validate_content(content)?;
        self.authorize(Capability::EditMessages)?;
        let original = self.store.message(conversation_id, message_id).await?;
        if original.role != MessageRole::User {
            return Err(Error::validation(
                "only user messages can be edited",
                Some("message_id".to_string()),
            ));
        }
        if original.content.trim() == content {
            debug!(conversation_id, message_id, "edit unchanged; nothing to send");
            return Ok(None);
        }
        let reservation = self.reserve(conversation_id)?;
        let prune = match self.retention {
            BranchRetention::PreserveAll => None,
            BranchRetention::PruneDescendants => Some(original.id.clone()),
        };
        self.start(
            conversation_id,
            original.parent_id.clone(),
            content,
            reservation,
            prune,
        )
        .await
        .map(Some)
    }

    /// Cancels the conversation's running exchange.  Returns false if none is running.
    pub fn stop(&self, conversation_id: &str) -> bool {
        match self.slots().get(conversation_id) {
            Some(active) => {
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true while the conversation has a `Pending` or `Streaming` exchange.
    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.slots().contains_key(conversation_id)
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, ActiveExchange>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn authorize(&self, capability: Capability) -> Result<()> {
        if !self.session.is_authenticated() {
            return Err(Error::authentication("Sign in to send messages"));
        }
        if !self.session.can(capability) {
            return Err(Error::permission(
                "Your account does not allow this action",
            ));
        }
        Ok(())
    }

    /// Claims the conversation's slot.  No await may precede this in a submit path.
    fn reserve(&self, conversation_id: &str) -> Result<Reservation> {
        let mut active = self.slots();
        if active.contains_key(conversation_id) {
            EXCHANGES_REJECTED.click();
            debug!(conversation_id, "exchange already active; rejecting submit");
            return Err(Error::exchange_active(conversation_id));
        }
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        active.insert(
            conversation_id.to_string(),
            ActiveExchange {
                ticket,
                cancel: cancel.clone(),
            },
        );
        Ok(Reservation { ticket, cancel })
    }

    fn release(&self, conversation_id: &str, ticket: u64) {
        let mut active = self.slots();
        if active.get(conversation_id).map(|a| a.ticket) == Some(ticket) {
            active.remove(conversation_id);
        }
    }

    async fn start(
        &self,
        conversation_id: &str,
        parent_id: Option<String>,
        content: &str,
        reservation: Reservation,
        prune_below: Option<String>,
    ) -> Result<ExchangeHandle> {
        if let Some(edited) = &prune_below {
            match self
                .store
                .prune_descendants(conversation_id, edited)
                .await
            {
                Ok(removed) => debug!(conversation_id, removed, "pruned replaced branch"),
                Err(err) => {
                    self.release(conversation_id, reservation.ticket);
                    return Err(err);
                }
            }
        }
        let user_message = match self
            .store
            .append_message(
                conversation_id,
                parent_id.as_deref(),
                MessageRole::User,
                content,
            )
            .await
        {
            Ok(message) => message,
            Err(err) => {
                self.release(conversation_id, reservation.ticket);
                return Err(err);
            }
        };

        EXCHANGES_STARTED.click();
        let exchange = StreamExchange::new(user_message);
        info!(
            conversation_id,
            exchange_id = %exchange.id,
            "exchange started"
        );
        let (updates, receiver) = watch::channel(exchange.clone());
        let handle = ExchangeHandle::new(&exchange, reservation.cancel, receiver);
        let request = StreamRequest {
            content: content.to_string(),
            parent_message_id: parent_id,
        };
        let controller = self.clone();
        let cancel = handle.cancel_token().clone();
        let ticket = reservation.ticket;
        tokio::spawn(async move {
            controller.run(exchange, request, cancel, updates, ticket).await;
        });
        Ok(handle)
    }

    async fn run(
        &self,
        exchange: StreamExchange,
        request: StreamRequest,
        cancel: CancellationToken,
        updates: watch::Sender<StreamExchange>,
        ticket: u64,
    ) {
        let started = Instant::now();
        let conversation_id = exchange.conversation_id.clone();
        let outcome = self
            .pump(&conversation_id, &request, &cancel, &updates, started)
            .await;
        STREAM_DURATION.add(started.elapsed().as_secs_f64());

        let mut terminal = updates.borrow().clone();
        terminal.status = outcome;
        let persist = match &terminal.status {
            ExchangeStatus::Complete => true,
            ExchangeStatus::Stopped => !terminal.assistant_draft.is_empty(),
            _ => false,
        };
        if persist {
            match self
                .store
                .append_message(
                    &conversation_id,
                    Some(&terminal.user_message.id),
                    MessageRole::Assistant,
                    &terminal.assistant_draft,
                )
                .await
            {
                Ok(message) => terminal.persisted_message_id = Some(message.id),
                Err(err) => {
                    warn!(
                        conversation_id = %conversation_id,
                        error = %err,
                        "could not persist assistant reply"
                    );
                    self.logger.report_error("persist_reply", &err.to_string());
                }
            }
        }

        match &terminal.status {
            ExchangeStatus::Complete => EXCHANGES_COMPLETED.click(),
            ExchangeStatus::Stopped => EXCHANGES_STOPPED.click(),
            _ => EXCHANGES_FAILED.click(),
        }
        self.release(&conversation_id, ticket);
        self.logger.log_exchange(&terminal);
        updates.send_replace(terminal);
    }

    /// Opens the stream and feeds the draft until it ends.  Returns the terminal status.
    ///
    /// Dropping the body stream on return releases the connection.
    async fn pump(
        &self,
        conversation_id: &str,
        request: &StreamRequest,
        cancel: &CancellationToken,
        updates: &watch::Sender<StreamExchange>,
        started: Instant,
    ) -> ExchangeStatus {
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return ExchangeStatus::Stopped,
            opened = self.client.open_stream(conversation_id, request) => match opened {
                Ok(body) => body,
                Err(err) => return ExchangeStatus::Failed(classify(&err)),
            },
        };

        let mut events = pin!(process_sse(body));
        let mut draft = Draft::new(updates, started);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return draft.drain(&mut events),
                next = events.next() => next,
            };
            if let Some(status) = draft.apply(next) {
                return status;
            }
        }
    }
}

/// Applies stream events to the published exchange.
struct Draft<'a> {
    updates: &'a watch::Sender<StreamExchange>,
    started: Instant,
    first: bool,
}

impl<'a> Draft<'a> {
    fn new(updates: &'a watch::Sender<StreamExchange>, started: Instant) -> Self {
        Self {
            updates,
            started,
            first: true,
        }
    }

    /// Applies one event.  Returns the terminal status once the stream has ended.
    fn apply(&mut self, next: Option<Result<StreamEvent>>) -> Option<ExchangeStatus> {
        match next {
            Some(Ok(StreamEvent::Chunk(text))) => {
                if self.first {
                    STREAM_TTFB.add(self.started.elapsed().as_secs_f64());
                    self.first = false;
                }
                STREAM_CHUNKS.click();
                STREAM_BYTES.count(text.len() as u64);
                self.updates.send_modify(|exchange| {
                    exchange.assistant_draft.push_str(&text);
                    exchange.status = ExchangeStatus::Streaming;
                });
                None
            }
            Some(Ok(StreamEvent::Done)) | None => Some(ExchangeStatus::Complete),
            Some(Ok(StreamEvent::Error(message))) => {
                Some(ExchangeStatus::Failed(FailureKind::Rejected {
                    status: None,
                    message,
                }))
            }
            Some(Err(err)) => Some(ExchangeStatus::Failed(classify(&err))),
        }
    }

    /// Takes whatever already arrived when a stop is observed, without waiting for more.
    ///
    /// A reply that was fully delivered completes normally; anything else is `Stopped`.
    fn drain<S>(&mut self, events: &mut S) -> ExchangeStatus
    where
        S: Stream<Item = Result<StreamEvent>> + Unpin,
    {
        while let Some(next) = events.next().now_or_never() {
            match self.apply(next) {
                None => continue,
                Some(ExchangeStatus::Complete) => return ExchangeStatus::Complete,
                Some(_) => break,
            }
        }
        ExchangeStatus::Stopped
    }
}

impl std::fmt::Debug for StreamingChatController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active: Vec<String> = self.slots().keys().cloned().collect();
        f.debug_struct("StreamingChatController")
            .field("retention", &self.retention)
            .field("active", &active)
            .finish_non_exhaustive()
    }
}

struct Reservation {
    ticket: u64,
    cancel: CancellationToken,
}

fn validate_content(content: &str) -> Result<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(Error::validation(
            "message cannot be empty",
            Some("content".to_string()),
        ));
    }
    Ok(content)
}

fn classify(err: &Error) -> FailureKind {
    if err.is_network() {
        FailureKind::Interrupted
    } else {
        FailureKind::Rejected {
            status: err.status_code(),
            message: err.user_message(),
        }
    }
}
