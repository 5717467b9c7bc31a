//! Streaming exchanges, stop, failure and branching edits against a scripted backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::*;
use workbench::{
    BranchRetention, ConversationStore, ExchangeStatus, FailureKind, MemoryConversationStore,
    MessageRole, StreamingChatController,
};

async fn controller(transport: &Arc<ScriptedTransport>) -> StreamingChatController {
    let session = signed_in(transport).await;
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
    StreamingChatController::new(session, store)
}

fn feed_for(transport: &ScriptedTransport, conversation_id: &str) -> StreamFeed {
    let (feed, reply) = stream();
    transport.on(Method::POST, &stream_path(conversation_id), reply);
    feed
}

#[tokio::test]
async fn completed_reply_is_persisted() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = assert_ok!(chat.submit("c1", "  What is 2 + 2?  ").await);
    assert!(chat.is_active("c1"));
    feed.chunk("The answer ");
    feed.chunk("is 4.");
    feed.done();

    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Complete);
    assert_eq!(exchange.assistant_draft, "The answer is 4.");
    assert_eq!(exchange.user_message.content, "What is 2 + 2?");
    assert!(exchange.is_persisted());
    assert!(!chat.is_active("c1"));

    let path = chat.store().active_path("c1").await.unwrap();
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].role, MessageRole::User);
    assert_eq!(path[1].role, MessageRole::Assistant);
    assert_eq!(path[1].content, "The answer is 4.");
    assert_eq!(Some(&path[1].id), exchange.persisted_message_id.as_ref());

    let request = &transport.requests_to(Method::POST, &stream_path("c1"))[0];
    assert_eq!(
        request.body,
        Some(json!({ "content": "What is 2 + 2?", "parent_message_id": null }))
    );
    assert_eq!(
        request
            .headers
            .get(workbench::CSRF_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("abc")
    );
}

#[tokio::test]
async fn follow_up_continues_from_the_leaf() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;

    let first = feed_for(&transport, "c1");
    let handle = chat.submit("c1", "Hello").await.unwrap();
    first.chunk("Hi!");
    first.done();
    let reply_id = handle.wait().await.persisted_message_id.unwrap();

    let second = feed_for(&transport, "c1");
    let handle = chat.submit("c1", "How are you?").await.unwrap();
    second.done();
    let exchange = handle.wait().await;
    assert_eq!(exchange.user_message.parent_id.as_deref(), Some(reply_id.as_str()));

    let requests = transport.requests_to(Method::POST, &stream_path("c1"));
    assert_eq!(
        requests[1].body.as_ref().unwrap()["parent_message_id"],
        json!(reply_id)
    );
}

#[tokio::test]
async fn one_exchange_per_conversation() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let x = feed_for(&transport, "x");
    let y = feed_for(&transport, "y");

    let first = chat.submit("x", "first").await.unwrap();
    let err = assert_err!(chat.submit("x", "second").await);
    assert!(err.is_exchange_active());

    let other = assert_ok!(chat.submit("y", "elsewhere").await);
    assert!(chat.is_active("x"));
    assert!(chat.is_active("y"));

    x.done();
    y.done();
    assert_eq!(first.wait().await.status, ExchangeStatus::Complete);
    assert_eq!(other.wait().await.status, ExchangeStatus::Complete);
    assert_eq!(transport.requests_to(Method::POST, &stream_path("x")).len(), 1);

    let again = feed_for(&transport, "x");
    let handle = assert_ok!(chat.submit("x", "second").await);
    again.done();
    handle.wait().await;
}

#[tokio::test]
async fn stop_keeps_partial_reply_and_closes_the_connection() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "What is 2 + 2?").await.unwrap();
    feed.chunk("4");
    let mut updates = handle.subscribe();
    updates
        .wait_for(|exchange| exchange.assistant_draft == "4")
        .await
        .unwrap();
    assert_eq!(handle.snapshot().status, ExchangeStatus::Streaming);

    assert!(chat.stop("c1"));
    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Stopped);
    assert_eq!(exchange.assistant_draft, "4");

    let persisted = exchange.persisted_message_id.clone().unwrap();
    let message = chat.store().message("c1", &persisted).await.unwrap();
    assert_eq!(message.content, "4");

    tokio::time::timeout(Duration::from_secs(5), feed.closed())
        .await
        .expect("stream should be released after stop");
    assert!(!chat.is_active("c1"));
    // Fragments sent after the stop go nowhere.
    feed.chunk(" and more");
    assert_eq!(handle.snapshot().assistant_draft, "4");
}

#[tokio::test]
async fn stop_after_full_delivery_completes() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "What is 2 + 2?").await.unwrap();
    feed.chunk("4");
    let mut updates = handle.subscribe();
    updates
        .wait_for(|exchange| exchange.assistant_draft == "4")
        .await
        .unwrap();

    // The rest of the reply is already buffered when the stop lands.
    feed.chunk(" is the answer");
    feed.done();
    assert!(chat.stop("c1"));

    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Complete);
    assert_eq!(exchange.assistant_draft, "4 is the answer");
    let persisted = exchange.persisted_message_id.clone().unwrap();
    let message = chat.store().message("c1", &persisted).await.unwrap();
    assert_eq!(message.content, "4 is the answer");
}

#[tokio::test]
async fn stop_keeps_fragments_delivered_before_it() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "Count to three").await.unwrap();
    feed.chunk("one");
    let mut updates = handle.subscribe();
    updates
        .wait_for(|exchange| exchange.assistant_draft == "one")
        .await
        .unwrap();

    feed.chunk(" two");
    assert!(chat.stop("c1"));

    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Stopped);
    assert_eq!(exchange.assistant_draft, "one two");
    assert!(exchange.is_persisted());
}

#[tokio::test]
async fn stop_before_first_fragment_saves_nothing() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let (_open, reply) = gated(Reply::ok(json!({})));
    transport.on(Method::POST, &stream_path("c1"), reply);

    let handle = chat.submit("c1", "hello?").await.unwrap();
    assert!(chat.stop("c1"));
    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Stopped);
    assert!(exchange.assistant_draft.is_empty());
    assert!(!exchange.is_persisted());

    let path = chat.store().active_path("c1").await.unwrap();
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].role, MessageRole::User);
}

#[tokio::test]
async fn stop_without_exchange_is_a_no_op() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    assert!(!chat.stop("nothing-running"));
}

#[tokio::test]
async fn interrupted_stream_keeps_draft_unsaved() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "Tell me a story").await.unwrap();
    feed.chunk("Once upon");
    feed.interrupt();

    let exchange = handle.wait().await;
    assert_eq!(
        exchange.status,
        ExchangeStatus::Failed(FailureKind::Interrupted)
    );
    assert_eq!(exchange.assistant_draft, "Once upon");
    assert!(!exchange.is_persisted());
    assert_eq!(
        exchange.failure().map(|f| f.user_message()),
        Some("Response interrupted".to_string())
    );
    assert!(!chat.is_active("c1"));

    let path = chat.store().active_path("c1").await.unwrap();
    assert_eq!(path.len(), 1);
    assert_eq!(path[0].content, "Tell me a story");
}

#[tokio::test]
async fn server_rejection_reports_status() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    transport.on(
        Method::POST,
        &stream_path("c1"),
        Reply::Json(500, json!({ "error": "boom" })),
    );

    let handle = chat.submit("c1", "hello").await.unwrap();
    let exchange = handle.wait().await;
    match exchange.status {
        ExchangeStatus::Failed(FailureKind::Rejected { status, message }) => {
            assert_eq!(status, Some(500));
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(!chat.is_active("c1"));
}

#[tokio::test]
async fn error_event_fails_the_exchange() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "hello").await.unwrap();
    feed.chunk("Let me");
    feed.server_error("model overloaded");

    let exchange = handle.wait().await;
    assert_eq!(
        exchange.status,
        ExchangeStatus::Failed(FailureKind::Rejected {
            status: None,
            message: "model overloaded".to_string(),
        })
    );
    assert_eq!(exchange.assistant_draft, "Let me");
    assert!(!exchange.is_persisted());
}

#[tokio::test]
async fn end_of_body_without_done_completes() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let feed = feed_for(&transport, "c1");

    let handle = chat.submit("c1", "hello").await.unwrap();
    feed.chunk("bye");
    drop(feed);

    let exchange = handle.wait().await;
    assert_eq!(exchange.status, ExchangeStatus::Complete);
    assert!(exchange.is_persisted());
}

#[tokio::test]
async fn signed_out_users_cannot_submit() {
    let transport = ScriptedTransport::new();
    let session = session_store(&transport);
    let store: Arc<dyn ConversationStore> = Arc::new(MemoryConversationStore::new());
    let chat = StreamingChatController::new(session, store);

    let err = assert_err!(chat.submit("c1", "hello").await);
    assert!(err.is_authentication());
    assert!(!chat.is_active("c1"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn blank_messages_are_rejected_locally() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let before = transport.requests().len();

    let err = assert_err!(chat.submit("c1", " \n\t ").await);
    assert!(err.is_validation());
    assert!(!chat.is_active("c1"));
    assert_eq!(transport.requests().len(), before);
}

/// Runs one exchange to completion and returns (user message id, reply id).
async fn exchange(
    chat: &StreamingChatController,
    transport: &ScriptedTransport,
    conversation_id: &str,
    content: &str,
    reply: &str,
) -> (String, String) {
    let feed = feed_for(transport, conversation_id);
    let handle = chat.submit(conversation_id, content).await.unwrap();
    feed.chunk(reply);
    feed.done();
    let exchange = handle.wait().await;
    (
        exchange.user_message.id,
        exchange.persisted_message_id.unwrap(),
    )
}

#[tokio::test]
async fn edit_branches_without_losing_the_original() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let (original_id, original_reply) =
        exchange(&chat, &transport, "c1", "Initial Message", "First answer").await;

    let feed = feed_for(&transport, "c1");
    let handle = chat
        .edit("c1", &original_id, "Edited message")
        .await
        .unwrap()
        .expect("content changed");
    feed.chunk("Second answer");
    feed.done();
    let edited = handle.wait().await;
    assert_eq!(edited.status, ExchangeStatus::Complete);
    assert_eq!(edited.user_message.parent_id, None);

    let store = chat.store();
    let path = store.active_path("c1").await.unwrap();
    assert_eq!(path.len(), 2);
    assert_eq!(path[0].content, "Edited message");
    assert_eq!(path[1].content, "Second answer");

    let original = store.message("c1", &original_id).await.unwrap();
    assert_eq!(original.content, "Initial Message");
    let reply = store.message("c1", &original_reply).await.unwrap();
    assert_eq!(reply.content, "First answer");

    let siblings = store.siblings("c1", &original_id).await.unwrap();
    let ids: Vec<&str> = siblings.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec![original_id.as_str(), edited.user_message.id.as_str()]);

    let leaf = store.switch_branch("c1", &original_id).await.unwrap();
    assert_eq!(leaf.id, original_reply);
    let path = store.active_path("c1").await.unwrap();
    assert_eq!(path[0].content, "Initial Message");

    let request = &transport.requests_to(Method::POST, &stream_path("c1"))[1];
    assert_eq!(
        request.body,
        Some(json!({ "content": "Edited message", "parent_message_id": null }))
    );
}

#[tokio::test]
async fn pruning_edit_discards_the_old_reply() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport)
        .await
        .with_retention(BranchRetention::PruneDescendants);
    let (original_id, original_reply) =
        exchange(&chat, &transport, "c1", "Initial Message", "First answer").await;

    let feed = feed_for(&transport, "c1");
    let handle = chat
        .edit("c1", &original_id, "Edited message")
        .await
        .unwrap()
        .unwrap();
    feed.done();
    handle.wait().await;

    let store = chat.store();
    assert!(store.message("c1", &original_id).await.is_ok());
    let err = assert_err!(store.message("c1", &original_reply).await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn unchanged_edit_sends_nothing() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let (original_id, _) = exchange(&chat, &transport, "c1", "Initial Message", "ok").await;
    let before = transport.requests().len();

    let outcome = chat.edit("c1", &original_id, "  Initial Message ").await;
    assert!(matches!(outcome, Ok(None)));
    assert_eq!(transport.requests().len(), before);
    assert!(!chat.is_active("c1"));
}

#[tokio::test]
async fn invalid_edits_are_rejected() {
    let transport = ScriptedTransport::new();
    let chat = controller(&transport).await;
    let (original_id, reply_id) = exchange(&chat, &transport, "c1", "Initial Message", "ok").await;

    let err = assert_err!(chat.edit("c1", &original_id, "   ").await);
    assert!(err.is_validation());

    let err = assert_err!(chat.edit("c1", &reply_id, "rewrite the answer").await);
    assert!(err.is_validation());

    let err = assert_err!(chat.edit("c1", "missing", "hello").await);
    assert!(err.is_not_found());
    assert!(!chat.is_active("c1"));
}
