//! Conversation persistence.
//!
//! Conversations are trees.  Every message points at its parent, an edit adds a sibling
//! instead of overwriting, and each conversation remembers which leaf the user is viewing.
//! [`ConversationStore`] is the seam the streaming controller writes through;
//! [`MemoryConversationStore`] is the in-process implementation.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Conversation, Message, MessageRole};

/// What happens to the old continuation when a message is edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchRetention {
    /// Every branch stays reachable.
    #[default]
    PreserveAll,
    /// Replies below the edited message are discarded.  The edited message itself survives.
    PruneDescendants,
}

/// Storage for conversation trees.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Records a conversation.  Re-registering an existing id updates its title only.
    async fn register_conversation(&self, conversation: Conversation) -> Result<()>;

    /// Returns a conversation by id.
    async fn conversation(&self, conversation_id: &str) -> Result<Conversation>;

    /// Returns every known conversation, oldest registration first.
    async fn conversations(&self) -> Result<Vec<Conversation>>;

    /// Appends a message under `parent_id` and makes it the active leaf.
    async fn append_message(
        &self,
        conversation_id: &str,
        parent_id: Option<&str>,
        role: MessageRole,
        content: &str,
    ) -> Result<Message>;

    /// Returns one message.
    async fn message(&self, conversation_id: &str, message_id: &str) -> Result<Message>;

    /// Returns the messages from the root to the active leaf.
    async fn active_path(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Returns the active leaf, or `None` for an empty conversation.
    async fn leaf(&self, conversation_id: &str) -> Result<Option<Message>>;

    /// Returns the message and every message sharing its parent, oldest first.
    async fn siblings(&self, conversation_id: &str, message_id: &str) -> Result<Vec<Message>>;

    /// Makes the branch through `message_id` active.
    ///
    /// The new leaf is found by following the newest child from `message_id` down.
    async fn switch_branch(&self, conversation_id: &str, message_id: &str) -> Result<Message>;

    /// Removes everything below `message_id` and returns how many messages were removed.
    async fn prune_descendants(&self, conversation_id: &str, message_id: &str) -> Result<usize>;
}

#[derive(Debug)]
struct Tree {
    conversation: Conversation,
    order: usize,
    messages: HashMap<String, Message>,
    children: HashMap<Option<String>, Vec<String>>,
    active_leaf: Option<String>,
}

impl Tree {
    fn new(conversation: Conversation, order: usize) -> Self {
        Self {
            conversation,
            order,
            messages: HashMap::new(),
            children: HashMap::new(),
            active_leaf: None,
        }
    }

    fn get(&self, message_id: &str) -> Result<&Message> {
        self.messages.get(message_id).ok_or_else(|| {
            Error::not_found(
                format!("message {message_id} not found"),
                Some("message".to_string()),
                Some(message_id.to_string()),
            )
        })
    }

    fn path_to(&self, message_id: &str) -> Vec<Message> {
        let mut path = Vec::new();
        let mut cursor = Some(message_id.to_string());
        while let Some(id) = cursor {
            let Some(message) = self.messages.get(&id) else {
                break;
            };
            cursor = message.parent_id.clone();
            path.push(message.clone());
        }
        path.reverse();
        path
    }

    fn newest_descendant(&self, message_id: &str) -> String {
        let mut current = message_id.to_string();
        while let Some(next) = self
            .children
            .get(&Some(current.clone()))
            .and_then(|kids| kids.last())
        {
            current = next.clone();
        }
        current
    }

    fn descendants(&self, message_id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![message_id.to_string()];
        while let Some(id) = stack.pop() {
            if let Some(kids) = self.children.get(&Some(id)) {
                for kid in kids {
                    out.push(kid.clone());
                    stack.push(kid.clone());
                }
            }
        }
        out
    }
}

/// An in-memory [`ConversationStore`].
///
/// Messages appended to a conversation that was never registered create it with no title.
///
/// ```
/// use workbench::{ConversationStore, MemoryConversationStore, MessageRole};
///
/// tokio_test::block_on(async {
///     let store = MemoryConversationStore::new();
///     let hello = store
///         .append_message("c1", None, MessageRole::User, "Hello")
///         .await
///         .unwrap();
///     let reply = store
///         .append_message("c1", Some(&hello.id), MessageRole::Assistant, "Hi!")
///         .await
///         .unwrap();
///     let path = store.active_path("c1").await.unwrap();
///     assert_eq!(path, vec![hello, reply]);
/// });
/// ```
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    trees: Mutex<HashMap<String, Tree>>,
}

impl MemoryConversationStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn trees(&self) -> MutexGuard<'_, HashMap<String, Tree>> {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_tree<T>(
        &self,
        conversation_id: &str,
        f: impl FnOnce(&mut Tree) -> Result<T>,
    ) -> Result<T> {
        let mut trees = self.trees();
        let tree = trees
            .get_mut(conversation_id)
            .ok_or_else(|| conversation_not_found(conversation_id))?;
        f(tree)
    }
}

fn conversation_not_found(conversation_id: &str) -> Error {
    Error::not_found(
        format!("conversation {conversation_id} not found"),
        Some("conversation".to_string()),
        Some(conversation_id.to_string()),
    )
}

#[async_trait::async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn register_conversation(&self, conversation: Conversation) -> Result<()> {
        let mut trees = self.trees();
        let order = trees.len();
        match trees.get_mut(&conversation.id) {
            Some(tree) => tree.conversation.title = conversation.title,
            None => {
                trees.insert(conversation.id.clone(), Tree::new(conversation, order));
            }
        }
        Ok(())
    }

    async fn conversation(&self, conversation_id: &str) -> Result<Conversation> {
        self.with_tree(conversation_id, |tree| Ok(tree.conversation.clone()))
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        let trees = self.trees();
        let mut all: Vec<&Tree> = trees.values().collect();
        all.sort_by_key(|tree| tree.order);
        Ok(all.into_iter().map(|t| t.conversation.clone()).collect())
    }

    async fn append_message(
        &self,
        conversation_id: &str,
        parent_id: Option<&str>,
        role: MessageRole,
        content: &str,
    ) -> Result<Message> {
        let mut trees = self.trees();
        let order = trees.len();
        let tree = trees.entry(conversation_id.to_string()).or_insert_with(|| {
            Tree::new(Conversation::new(conversation_id, None::<String>), order)
        });
        if let Some(parent) = parent_id {
            tree.get(parent)?;
        }
        let message = Message::new(
            conversation_id,
            parent_id.map(String::from),
            role,
            content,
        );
        tree.children
            .entry(message.parent_id.clone())
            .or_default()
            .push(message.id.clone());
        tree.messages.insert(message.id.clone(), message.clone());
        tree.active_leaf = Some(message.id.clone());
        Ok(message)
    }

    async fn message(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        self.with_tree(conversation_id, |tree| tree.get(message_id).cloned())
    }

    async fn active_path(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.with_tree(conversation_id, |tree| {
            Ok(match &tree.active_leaf {
                Some(leaf) => tree.path_to(leaf),
                None => Vec::new(),
            })
        })
    }

    async fn leaf(&self, conversation_id: &str) -> Result<Option<Message>> {
        self.with_tree(conversation_id, |tree| {
            Ok(tree
                .active_leaf
                .as_ref()
                .and_then(|id| tree.messages.get(id))
                .cloned())
        })
    }

    async fn siblings(&self, conversation_id: &str, message_id: &str) -> Result<Vec<Message>> {
        self.with_tree(conversation_id, |tree| {
            let parent = tree.get(message_id)?.parent_id.clone();
            Ok(tree
                .children
                .get(&parent)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| tree.messages.get(id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    async fn switch_branch(&self, conversation_id: &str, message_id: &str) -> Result<Message> {
        self.with_tree(conversation_id, |tree| {
            tree.get(message_id)?;
            let leaf = tree.newest_descendant(message_id);
            let message = tree.get(&leaf)?.clone();
            tree.active_leaf = Some(leaf);
            Ok(message)
        })
    }

    async fn prune_descendants(&self, conversation_id: &str, message_id: &str) -> Result<usize> {
        self.with_tree(conversation_id, |tree| {
            tree.get(message_id)?;
            let doomed = tree.descendants(message_id);
            for id in &doomed {
                tree.messages.remove(id);
                tree.children.remove(&Some(id.clone()));
            }
            tree.children.remove(&Some(message_id.to_string()));
            if let Some(active) = &tree.active_leaf
                && doomed.contains(active)
            {
                tree.active_leaf = Some(message_id.to_string());
            }
            Ok(doomed.len())
        })
    }
}
