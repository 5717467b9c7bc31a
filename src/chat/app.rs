//! Core chat application state.
//!
//! [`ChatApp`] ties the session store, the streaming controller and the conversation store
//! together for the REPL and keeps track of which conversation is current.

use std::sync::Arc;
use std::time::Duration;

use crate::chat::config::ChatConfig;
use crate::client::Workbench;
use crate::conversation::{ConversationStore, MemoryConversationStore};
use crate::controller::StreamingChatController;
use crate::error::{Error, Result};
use crate::exchange::{ExchangeHandle, StreamExchange};
use crate::render::{DraftCursor, Renderer};
use crate::session::{Session, SessionStore};
use crate::types::{Conversation, Credentials, Message, RegisterDetails, SearchResults};

/// How often a streaming reply checks for a Ctrl+C while no fragment arrives.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Default number of search hits to request.
const SEARCH_LIMIT: u32 = 10;

/// The interactive application.
pub struct ChatApp {
    session: Arc<SessionStore>,
    controller: StreamingChatController,
    store: Arc<dyn ConversationStore>,
    current: Option<String>,
}

impl ChatApp {
    /// Creates an application over the configured backend.
    pub fn new(config: &ChatConfig) -> Result<Self> {
        let client = Workbench::new(config.client.clone())?;
        Ok(Self::with_client(client))
    }

    /// Creates an application over an existing client.
    pub fn with_client(client: Workbench) -> Self {
        let session = Arc::new(SessionStore::new(client));
        let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
        let controller = StreamingChatController::new(Arc::clone(&session), Arc::clone(&store));
        Self {
            session,
            controller,
            store,
            current: None,
        }
    }

    /// Restores a server-side session, once, without showing progress.
    pub async fn start(&self) -> Session {
        self.session.rehydrate().await;
        self.session.snapshot()
    }

    /// The session store.
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The streaming controller.
    pub fn controller(&self) -> &StreamingChatController {
        &self.controller
    }

    /// The current conversation id.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Signs in and returns the resulting session.
    pub async fn login(&self, email: &str, password: &str) -> Session {
        self.session
            .login(&Credentials::new(email, password))
            .await;
        self.session.snapshot()
    }

    /// Creates an account and returns the resulting session.
    pub async fn register(&self, email: &str, username: &str, password: &str) -> Session {
        self.session
            .register(&RegisterDetails::new(email, username, password))
            .await;
        self.session.snapshot()
    }

    /// Signs out and forgets the current conversation.
    pub async fn logout(&mut self) {
        if let Some(current) = &self.current {
            self.controller.stop(current);
        }
        self.current = None;
        self.session.logout().await;
    }

    /// Creates a conversation on the server and makes it current.
    pub async fn new_conversation(&mut self, title: Option<String>) -> Result<Conversation> {
        let conversation = self
            .session
            .client()
            .create_conversation(title)
            .await?;
        self.store
            .register_conversation(conversation.clone())
            .await?;
        self.current = Some(conversation.id.clone());
        Ok(conversation)
    }

    /// Makes an existing conversation current.
    pub async fn open(&mut self, conversation_id: &str) -> Result<()> {
        if let Err(err) = self.store.conversation(conversation_id).await {
            if !err.is_not_found() {
                return Err(err);
            }
            self.store
                .register_conversation(Conversation::new(conversation_id, None))
                .await?;
        }
        self.current = Some(conversation_id.to_string());
        Ok(())
    }

    /// Known conversations.
    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.store.conversations().await
    }

    /// Sends a message to the current conversation and renders the reply as it streams.
    pub async fn send(&self, content: &str, renderer: &mut dyn Renderer) -> Result<StreamExchange> {
        let conversation_id = self.require_current()?;
        let handle = self.controller.submit(conversation_id, content).await?;
        Ok(self.follow(handle, renderer).await)
    }

    /// Edits a message in the current conversation.  `Ok(None)` means the text was unchanged.
    pub async fn edit(
        &self,
        message_id: &str,
        content: &str,
        renderer: &mut dyn Renderer,
    ) -> Result<Option<StreamExchange>> {
        let conversation_id = self.require_current()?;
        match self
            .controller
            .edit(conversation_id, message_id, content)
            .await?
        {
            Some(handle) => Ok(Some(self.follow(handle, renderer).await)),
            None => Ok(None),
        }
    }

    /// The alternatives to a message in the current conversation.
    pub async fn branches(&self, message_id: &str) -> Result<Vec<Message>> {
        let conversation_id = self.require_current()?;
        self.store.siblings(conversation_id, message_id).await
    }

    /// Switches to the branch through `message_id` and returns the new active path.
    pub async fn switch(&self, message_id: &str) -> Result<Vec<Message>> {
        let conversation_id = self.require_current()?;
        self.store.switch_branch(conversation_id, message_id).await?;
        self.store.active_path(conversation_id).await
    }

    /// The active branch of the current conversation.
    pub async fn history(&self) -> Result<Vec<Message>> {
        let conversation_id = self.require_current()?;
        match self.store.active_path(conversation_id).await {
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }

    /// Semantic search.  Runs independently of any streaming reply.
    pub async fn search(&self, query: &str) -> Result<SearchResults> {
        self.session
            .client()
            .search(query, Some(SEARCH_LIMIT))
            .await
    }

    fn require_current(&self) -> Result<&str> {
        self.current.as_deref().ok_or_else(|| {
            Error::validation(
                "no conversation selected; use /new or /open first",
                Some("conversation_id".to_string()),
            )
        })
    }

    /// Renders an exchange until it ends.  An interrupt from the renderer stops it.
    async fn follow(&self, handle: ExchangeHandle, renderer: &mut dyn Renderer) -> StreamExchange {
        let mut updates = handle.subscribe();
        let mut cursor = DraftCursor::new();
        let mut stop_sent = false;
        renderer.start_reply(&handle.snapshot());
        loop {
            let snapshot = updates.borrow_and_update().clone();
            let tail = cursor.advance(&snapshot.assistant_draft);
            if !tail.is_empty() {
                renderer.print_text(tail);
            }
            if snapshot.status.is_terminal() {
                renderer.finish_reply(&snapshot);
                return snapshot;
            }
            if !stop_sent && renderer.should_interrupt() {
                self.controller.stop(handle.conversation_id());
                stop_sent = true;
            }
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        let last = updates.borrow().clone();
                        renderer.finish_reply(&last);
                        return last;
                    }
                }
                _ = tokio::time::sleep(INTERRUPT_POLL) => {}
            }
        }
    }
}

impl std::fmt::Debug for ChatApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatApp")
            .field("session", &self.session.snapshot())
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}
