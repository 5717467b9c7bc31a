//! Anti-forgery token management.
//!
//! [`CsrfGuard`] is the only owner of the cached CSRF token.  It fetches the token lazily,
//! attaches it to mutating same-origin requests, and forgets it when the server rejects it or
//! the user signs out.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{ACCEPT, HeaderName, HeaderValue};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::client::{bounded, error_from_response};
use crate::error::{Error, Result};
use crate::observability::{CSRF_FETCHES, CSRF_INVALIDATIONS};
use crate::transport::{HttpRequest, Transport};
use crate::types::CsrfTokenResponse;

/// Header that carries the token on guarded requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// A cached anti-forgery token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    /// Opaque token value.
    pub value: String,
    /// When the client obtained the token.
    pub acquired_at: OffsetDateTime,
}

impl CsrfToken {
    /// Wraps a token value obtained now.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            acquired_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Acquires, caches, and attaches CSRF tokens.
pub struct CsrfGuard {
    transport: Arc<dyn Transport>,
    token_url: Url,
    exempt: Vec<Url>,
    timeout: Duration,
    token: Mutex<Option<CsrfToken>>,
}

impl CsrfGuard {
    /// Creates a guard.
    ///
    /// `token_url` is the token endpoint; requests whose path matches one of `exempt` (login and
    /// registration) are never guarded since no session exists yet to scope a token to.
    pub fn new(
        transport: Arc<dyn Transport>,
        token_url: Url,
        exempt: Vec<Url>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            token_url,
            exempt,
            timeout,
            token: Mutex::new(None),
        }
    }

    /// Returns the cached token, fetching a fresh one when none is cached.
    ///
    /// Concurrent callers share a single fetch.
    pub async fn get_token(&self) -> Result<CsrfToken> {
        let mut slot = self.token.lock().await;
        if let Some(token) = slot.as_ref() {
            return Ok(token.clone());
        }
        let token = self.fetch().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Returns the cached token without fetching.
    pub async fn cached(&self) -> Option<CsrfToken> {
        self.token.lock().await.clone()
    }

    /// Replaces the cached token, e.g. with the one returned by a login response.
    pub async fn seed(&self, value: impl Into<String>) {
        *self.token.lock().await = Some(CsrfToken::new(value));
    }

    /// Discards the cached token; the next [`get_token`](Self::get_token) refetches.
    pub async fn invalidate(&self) {
        if self.token.lock().await.take().is_some() {
            CSRF_INVALIDATIONS.click();
            debug!("csrf token invalidated");
        }
    }

    /// Discards the cached token only if it is still `value`.
    ///
    /// A token that another request refreshed in the meantime is kept.
    pub async fn forget(&self, value: &str) {
        let mut slot = self.token.lock().await;
        if slot.as_ref().is_some_and(|token| token.value == value) {
            slot.take();
            CSRF_INVALIDATIONS.click();
            debug!("rejected csrf token discarded");
        }
    }

    /// Returns true when `request` must carry a token.
    pub fn requires_token(&self, request: &HttpRequest) -> bool {
        if request.is_safe_method() {
            return false;
        }
        if request.url.origin() != self.token_url.origin() {
            return false;
        }
        !self
            .exempt
            .iter()
            .any(|exempt| exempt.path() == request.url.path())
    }

    /// Adds the `X-CSRF-Token` header when the request needs one.
    pub async fn attach(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        if !self.requires_token(&request) {
            return Ok(request);
        }
        let token = self.get_token().await?;
        let value = HeaderValue::from_str(&token.value).map_err(|e| {
            Error::validation(
                format!("CSRF token is not a valid header value: {e}"),
                Some("csrf_token".to_string()),
            )
        })?;
        request
            .headers
            .insert(HeaderName::from_static(CSRF_HEADER), value);
        Ok(request)
    }

    async fn fetch(&self) -> Result<CsrfToken> {
        CSRF_FETCHES.click();
        debug!(url = %self.token_url, "fetching csrf token");
        let mut request = HttpRequest::new(Method::GET, self.token_url.clone());
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        bounded(self.timeout, "CSRF token fetch", async move {
            let response = self.transport.execute(request).await?;
            if !response.is_success() {
                return Err(error_from_response(response).await);
            }
            let body = response.bytes().await?;
            let parsed: CsrfTokenResponse = serde_json::from_slice(&body).map_err(|e| {
                Error::serialization(
                    format!("Failed to parse CSRF token response: {e}"),
                    Some(Box::new(e)),
                )
            })?;
            Ok(CsrfToken::new(parsed.csrf_token))
        })
        .await
    }
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("token_url", &self.token_url)
            .field("exempt", &self.exempt)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::HttpResponse;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TokenServer {
        fetches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for TokenServer {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
            assert_eq!(request.method, Method::GET);
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HttpResponse::from_bytes(
                200,
                format!(r#"{{"csrf_token":"token-{n}","timestamp":0}}"#),
            ))
        }
    }

    fn guard() -> (Arc<TokenServer>, CsrfGuard) {
        let server = Arc::new(TokenServer {
            fetches: AtomicUsize::new(0),
        });
        let base = Url::parse("http://localhost:8000/").unwrap();
        let guard = CsrfGuard::new(
            server.clone(),
            base.join("api/v1/auth/csrf-token").unwrap(),
            vec![
                base.join("api/v1/auth/login").unwrap(),
                base.join("api/v1/auth/register").unwrap(),
            ],
            Duration::from_secs(1),
        );
        (server, guard)
    }

    fn post(path: &str) -> HttpRequest {
        HttpRequest::new(Method::POST, Url::parse(path).unwrap())
    }

    #[tokio::test]
    async fn token_is_cached() {
        let (server, guard) = guard();
        assert_eq!(guard.get_token().await.unwrap().value, "token-1");
        assert_eq!(guard.get_token().await.unwrap().value, "token-1");
        assert_eq!(server.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let (server, guard) = guard();
        guard.get_token().await.unwrap();
        guard.invalidate().await;
        assert!(guard.cached().await.is_none());
        assert_eq!(guard.get_token().await.unwrap().value, "token-2");
        assert_eq!(server.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn forget_keeps_a_newer_token() {
        let (server, guard) = guard();
        guard.seed("old").await;
        guard.seed("new").await;
        guard.forget("old").await;
        assert_eq!(guard.cached().await.map(|t| t.value), Some("new".to_string()));
        guard.forget("new").await;
        assert!(guard.cached().await.is_none());
        assert_eq!(server.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn seeded_token_skips_fetch() {
        let (server, guard) = guard();
        guard.seed("abc").await;
        let request = guard
            .attach(post("http://localhost:8000/api/v1/conversations"))
            .await
            .unwrap();
        assert_eq!(request.headers.get("X-CSRF-Token").unwrap(), "abc");
        assert_eq!(server.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exemptions() {
        let (server, guard) = guard();
        let get = HttpRequest::new(
            Method::GET,
            Url::parse("http://localhost:8000/api/v1/auth/me").unwrap(),
        );
        let login = post("http://localhost:8000/api/v1/auth/login");
        let register = post("http://localhost:8000/api/v1/auth/register");
        let foreign = post("https://elsewhere.example.com/api/v1/conversations");
        for request in [get, login, register, foreign] {
            assert!(!guard.requires_token(&request));
            let attached = guard.attach(request).await.unwrap();
            assert!(attached.headers.get(CSRF_HEADER).is_none());
        }
        assert_eq!(server.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mutating_same_origin_requires_token() {
        let (_, guard) = guard();
        let logout = post("http://localhost:8000/api/v1/auth/logout");
        assert!(guard.requires_token(&logout));
        let attached = guard.attach(logout).await.unwrap();
        assert_eq!(attached.headers.get(CSRF_HEADER).unwrap(), "token-1");
    }
}
