//! A scripted [`Transport`] for driving the client without a server.
//!
//! Replies are queued per `METHOD /path`.  Streaming replies are backed by a channel so a test
//! can feed fragments one at a time and observe when the client drops the connection.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};

use workbench::{
    ClientConfig, Error, HttpRequest, HttpResponse, Result, SessionStore, Transport, Workbench,
};

pub const LOGIN: &str = "/api/v1/auth/login";
pub const REGISTER: &str = "/api/v1/auth/register";
pub const LOGOUT: &str = "/api/v1/auth/logout";
pub const ME: &str = "/api/v1/auth/me";
pub const CSRF: &str = "/api/v1/auth/csrf-token";
pub const CONVERSATIONS: &str = "/api/v1/conversations";
pub const SEARCH: &str = "/api/v1/search";

pub fn stream_path(conversation_id: &str) -> String {
    format!("{CONVERSATIONS}/{conversation_id}/stream")
}

/// One scripted reply.
pub enum Reply {
    /// A JSON body.
    Json(u16, Value),
    /// A plain text body.
    Text(u16, String),
    /// A body fed through a [`StreamFeed`].
    Stream(mpsc::UnboundedReceiver<Result<Bytes>>),
    /// A transport-level failure.
    Fail(fn() -> Error),
    /// Wait for the gate to open, then reply.
    Gated(oneshot::Receiver<()>, Box<Reply>),
    /// Wait, then reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Reply::Json(200, body)
    }

    pub fn csrf_rejection() -> Self {
        Reply::Json(
            403,
            json!({ "error": { "code": "CSRF_VALIDATION_FAILED", "message": "CSRF token invalid" } }),
        )
    }

    pub fn connection_refused() -> Self {
        Reply::Fail(|| Error::connection("connection refused", None))
    }
}

/// The test's end of a streaming reply.
pub struct StreamFeed {
    tx: mpsc::UnboundedSender<Result<Bytes>>,
}

impl StreamFeed {
    pub fn chunk(&self, content: &str) {
        let event = json!({ "type": "chunk", "content": content });
        self.raw(&format!("data: {event}\n\n"));
    }

    pub fn done(&self) {
        self.raw("data: {\"type\":\"done\"}\n\n");
    }

    pub fn server_error(&self, message: &str) {
        let event = json!({ "type": "error", "error": message });
        self.raw(&format!("data: {event}\n\n"));
    }

    pub fn interrupt(&self) {
        let _ = self
            .tx
            .send(Err(Error::streaming("connection reset by peer", None)));
    }

    pub fn raw(&self, text: &str) {
        let _ = self.tx.send(Ok(Bytes::from(text.to_string())));
    }

    /// True once the client has dropped the response body.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Waits until the client drops the response body.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

pub fn stream() -> (StreamFeed, Reply) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StreamFeed { tx }, Reply::Stream(rx))
}

pub fn gated(reply: Reply) -> (oneshot::Sender<()>, Reply) {
    let (tx, rx) = oneshot::channel();
    (tx, Reply::Gated(rx, Box::new(reply)))
}

#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<HttpRequest>>,
    csrf_issued: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a reply for `METHOD path`.
    pub fn on(&self, method: Method, path: &str, reply: Reply) {
        self.routes
            .lock()
            .unwrap()
            .entry(key(&method, path))
            .or_default()
            .push_back(reply);
    }

    /// Every request seen so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests to `METHOD path`.
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.url.path() == path)
            .collect()
    }

    /// How many tokens the default CSRF route has handed out.
    pub fn csrf_fetches(&self) -> usize {
        self.csrf_issued.load(Ordering::SeqCst)
    }

    fn next(&self, method: &Method, path: &str) -> Option<Reply> {
        self.routes
            .lock()
            .unwrap()
            .get_mut(&key(method, path))
            .and_then(|queue| queue.pop_front())
    }
}

fn key(method: &Method, path: &str) -> String {
    format!("{method} {path}")
}

type Pending = Pin<Box<dyn Future<Output = Result<HttpResponse>> + Send>>;

fn respond(reply: Reply) -> Pending {
    Box::pin(async move {
        match reply {
            Reply::Json(status, body) => Ok(HttpResponse::from_bytes(status, body.to_string())),
            Reply::Text(status, body) => Ok(HttpResponse::from_bytes(status, body)),
            Reply::Stream(rx) => {
                let body = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                });
                Ok(HttpResponse::from_stream(200, Box::pin(body)))
            }
            Reply::Fail(make) => Err(make()),
            Reply::Gated(gate, reply) => {
                let _ = gate.await;
                respond(*reply).await
            }
            Reply::Delayed(delay, reply) => {
                tokio::time::sleep(delay).await;
                respond(*reply).await
            }
        }
    })
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method.clone();
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(request);
        match self.next(&method, &path) {
            Some(reply) => respond(reply).await,
            None if method == Method::GET && path == CSRF => {
                let n = self.csrf_issued.fetch_add(1, Ordering::SeqCst) + 1;
                let body = json!({ "csrf_token": format!("csrf-{n}"), "timestamp": n });
                Ok(HttpResponse::from_bytes(200, body.to_string()))
            }
            None => Ok(HttpResponse::from_bytes(
                404,
                json!({ "error": format!("no scripted reply for {method} {path}") }).to_string(),
            )),
        }
    }
}

pub fn user_json(email: &str) -> Value {
    json!({
        "id": 1,
        "email": email,
        "username": "test",
        "role": "member",
        "created_at": "2024-01-01T00:00:00Z",
        "updated_at": "2024-01-01T00:00:00Z",
    })
}

pub fn login_ok(email: &str, token: &str) -> Reply {
    Reply::ok(json!({ "user": user_json(email), "csrf_token": token }))
}

pub fn workbench(transport: &Arc<ScriptedTransport>) -> Workbench {
    let transport: Arc<dyn Transport> = transport.clone();
    Workbench::with_transport(ClientConfig::new(), transport).expect("default config is valid")
}

pub fn session_store(transport: &Arc<ScriptedTransport>) -> Arc<SessionStore> {
    Arc::new(SessionStore::new(workbench(transport)))
}

/// A session store that is already signed in with CSRF token `abc`.
pub async fn signed_in(transport: &Arc<ScriptedTransport>) -> Arc<SessionStore> {
    transport.on(Method::POST, LOGIN, login_ok("test@workbench.com", "abc"));
    let session = session_store(transport);
    assert!(
        session
            .login(&workbench::Credentials::new(
                "test@workbench.com",
                "testpassword123"
            ))
            .await
    );
    session
}
