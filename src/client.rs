use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Method;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::csrf::{CSRF_HEADER, CsrfGuard};
use crate::error::{CSRF_VALIDATION_FAILED, Error, Result};
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS, CSRF_FAILURES, CSRF_RETRIES,
};
use crate::transport::{ByteStream, HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::types::{
    AuthResponse, Conversation, CreateConversation, Credentials, RegisterDetails, SearchParams,
    SearchResults, StreamRequest,
};

pub(crate) const LOGIN_PATH: &str = "api/v1/auth/login";
pub(crate) const REGISTER_PATH: &str = "api/v1/auth/register";
pub(crate) const LOGOUT_PATH: &str = "api/v1/auth/logout";
pub(crate) const ME_PATH: &str = "api/v1/auth/me";
pub(crate) const CSRF_TOKEN_PATH: &str = "api/v1/auth/csrf-token";
pub(crate) const CONVERSATIONS_PATH: &str = "api/v1/conversations";
pub(crate) const SEARCH_PATH: &str = "api/v1/search";

/// Client for the Workbench API.
///
/// Cheap to clone; clones share the transport (and therefore the cookie jar) and the CSRF
/// token cache.
#[derive(Debug, Clone)]
pub struct Workbench {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    csrf: Arc<CsrfGuard>,
}

impl Workbench {
    /// Create a new client talking HTTP through `reqwest`.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(config.connect_timeout)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create a client from the environment (`WORKBENCH_API_URL`, `WORKBENCH_TIMEOUT_SECS`).
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        let csrf = CsrfGuard::new(
            transport.clone(),
            config.endpoint(CSRF_TOKEN_PATH)?,
            vec![config.endpoint(LOGIN_PATH)?, config.endpoint(REGISTER_PATH)?],
            config.timeout,
        );
        Ok(Self {
            config,
            transport,
            csrf: Arc::new(csrf),
        })
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the CSRF guard shared by this client.
    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    /// Authenticate with email and password.
    ///
    /// The returned `csrf_token`, if any, is not cached here; [`SessionStore`] seeds it once
    /// it knows the result is still current.
    ///
    /// [`SessionStore`]: crate::session::SessionStore
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthResponse> {
        let request = self
            .request(Method::POST, LOGIN_PATH)?
            .with_json(serde_json::to_value(credentials)?);
        self.send_json(request).await
    }

    /// Create an account and sign in.
    pub async fn register(&self, details: &RegisterDetails) -> Result<AuthResponse> {
        let request = self
            .request(Method::POST, REGISTER_PATH)?
            .with_json(serde_json::to_value(details)?);
        self.send_json(request).await
    }

    /// End the server-side session.
    ///
    /// The CSRF cache is cleared whether or not the call succeeds.
    pub async fn logout(&self) -> Result<()> {
        let request = self.request(Method::POST, LOGOUT_PATH)?;
        let result = bounded(self.config.timeout, "logout", async move {
            let response = self.send_guarded(request).await?;
            response.bytes().await?;
            Ok(())
        })
        .await;
        self.csrf.invalidate().await;
        result
    }

    /// Fetch the user behind the ambient session cookie.
    pub async fn current_user(&self) -> Result<AuthResponse> {
        let request = self.request(Method::GET, ME_PATH)?;
        self.send_json(request).await
    }

    /// Create a new conversation on the server.
    pub async fn create_conversation(&self, title: Option<String>) -> Result<Conversation> {
        let request = self
            .request(Method::POST, CONVERSATIONS_PATH)?
            .with_json(serde_json::to_value(CreateConversation { title })?);
        bounded(self.config.timeout, "create conversation", async move {
            let response = self.send_guarded(request).await?;
            parse_json(response).await
        })
        .await
    }

    /// Submit a user message and open the assistant's streamed reply.
    ///
    /// Only connection establishment is bounded; the returned body may run indefinitely and is
    /// released when dropped.
    pub async fn open_stream(
        &self,
        conversation_id: &str,
        body: &StreamRequest,
    ) -> Result<ByteStream> {
        let path = format!("{CONVERSATIONS_PATH}/{conversation_id}/stream");
        let mut request = self
            .request(Method::POST, &path)?
            .with_json(serde_json::to_value(body)?);
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = self.send_guarded(request).await?;
        Ok(response.body)
    }

    /// Semantic search over the user's conversations.
    ///
    /// An empty query is rejected before any network call.
    pub async fn search(&self, query: &str, limit: Option<u32>) -> Result<SearchResults> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::validation(
                "Search query cannot be empty",
                Some("q".to_string()),
            ));
        }
        let params = SearchParams {
            q: query.to_string(),
            limit,
        };
        let mut url = self.config.endpoint(SEARCH_PATH)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &params.q);
            if let Some(limit) = params.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
        }
        let mut request = HttpRequest::new(Method::GET, url);
        request.headers = self.default_headers();
        self.send_json(request).await
    }

    /// Create and return default headers for API requests.
    fn default_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers
    }

    fn request(&self, method: Method, path: &str) -> Result<HttpRequest> {
        let mut request = HttpRequest::new(method, self.config.endpoint(path)?);
        request.headers = self.default_headers();
        Ok(request)
    }

    /// Send an unguarded request and decode the JSON reply within the configured timeout.
    async fn send_json<T: DeserializeOwned>(&self, request: HttpRequest) -> Result<T> {
        let what = format!("{} {}", request.method, request.url.path());
        bounded(self.config.timeout, &what, async move {
            let response = self.execute(request).await?;
            if !response.is_success() {
                return Err(error_from_response(response).await);
            }
            parse_json(response).await
        })
        .await
    }

    /// Send a request that may need a CSRF token.
    ///
    /// A CSRF rejection discards the rejected token and retries exactly once with a fresh
    /// one.  A second rejection is returned to the caller.
    async fn send_guarded(&self, request: HttpRequest) -> Result<HttpResponse> {
        let (sent, result) = self.send_with_token(request.clone()).await;
        match result {
            Err(err) if err.is_csrf() => {
                CSRF_RETRIES.click();
                warn!(url = %request.url, "csrf token rejected; refreshing and retrying once");
                self.discard(sent.as_deref()).await;
                let (sent, retried) = self.send_with_token(request).await;
                if let Err(err) = &retried
                    && err.is_csrf()
                {
                    CSRF_FAILURES.click();
                    self.discard(sent.as_deref()).await;
                }
                retried
            }
            other => other,
        }
    }

    /// Attaches the current token and sends.  Also returns the token value that went out.
    async fn send_with_token(
        &self,
        request: HttpRequest,
    ) -> (Option<String>, Result<HttpResponse>) {
        let request = match self.csrf.attach(request).await {
            Ok(request) => request,
            Err(err) => return (None, Err(err)),
        };
        let sent = request
            .headers
            .get(CSRF_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let result = match self.execute(request).await {
            Ok(response) if !response.is_success() => Err(error_from_response(response).await),
            other => other,
        };
        (sent, result)
    }

    async fn discard(&self, rejected: Option<&str>) {
        match rejected {
            Some(value) => self.csrf.forget(value).await,
            None => self.csrf.invalidate().await,
        }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        debug!(method = %request.method, url = %request.url, "request");
        let result = self.transport.execute(request).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        match &result {
            Ok(response) if !response.is_success() => CLIENT_REQUEST_ERRORS.click(),
            Err(_) => CLIENT_REQUEST_ERRORS.click(),
            Ok(_) => {}
        }
        result
    }
}

/// Run `fut`, failing with [`Error::Timeout`] once `timeout` elapses.
pub(crate) async fn bounded<T, F>(timeout: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(
            format!("{what} timed out"),
            Some(timeout.as_secs_f64()),
        )),
    }
}

async fn parse_json<T: DeserializeOwned>(response: HttpResponse) -> Result<T> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| {
        Error::serialization(
            format!("Failed to parse response: {e}"),
            Some(Box::new(e)),
        )
    })
}

/// Convert a non-2xx response into an [`Error`].
///
/// Bodies may be `{ "error": "..." }`, `{ "error": { "code", "message" } }`,
/// `{ "message": "..." }`, `{ "detail": "..." }`, or plain text.  When nothing usable is found
/// the message is `HTTP <status>`.
pub(crate) async fn error_from_response(response: HttpResponse) -> Error {
    let status_code = response.status;

    let request_id = response.header("x-request-id").map(String::from);
    let retry_after = response
        .header("retry-after")
        .and_then(|val| val.parse::<u64>().ok());

    let error_body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(format!("Failed to read error response: {e}"), None);
        }
    };

    let (code, message) = parse_error_body(&error_body);
    let message = message.unwrap_or_else(|| format!("HTTP {status_code}"));

    match status_code {
        400 => Error::bad_request(message),
        401 => Error::authentication(message),
        403 if code.as_deref() == Some(CSRF_VALIDATION_FAILED) => Error::csrf(message),
        403 => Error::permission(message),
        404 => Error::not_found(message, None, None),
        408 => Error::timeout(message, None),
        429 => Error::rate_limit(message, retry_after),
        500 => Error::internal_server(message, request_id),
        502..=504 => Error::service_unavailable(message, retry_after),
        _ => Error::api(status_code, code, message, request_id),
    }
}

fn parse_error_body(body: &str) -> (Option<String>, Option<String>) {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorField>,
        message: Option<String>,
        detail: Option<String>,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorField {
        Text(String),
        Detail {
            code: Option<String>,
            message: Option<String>,
        },
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, None);
    }
    match serde_json::from_str::<ErrorResponse>(trimmed) {
        Ok(parsed) => {
            let (code, nested) = match parsed.error {
                Some(ErrorField::Text(text)) => (None, Some(text)),
                Some(ErrorField::Detail { code, message }) => (code, message),
                None => (None, None),
            };
            let message = nested
                .or(parsed.message)
                .or(parsed.detail)
                .filter(|m| !m.trim().is_empty());
            (code, message)
        }
        // Bodies that are JSON of another shape carry no usable message.
        Err(_) if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() => (None, None),
        Err(_) => (None, Some(trimmed.to_string())),
    }
}
