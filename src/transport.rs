//! The HTTP seam.
//!
//! Everything the client sends goes through a [`Transport`].  The production implementation
//! wraps `reqwest` with a cookie store so the server's session cookie rides along on every
//! request.  Tests substitute a scripted implementation.

use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::{Client as ReqwestClient, Method};
use url::Url;

use crate::error::{Error, Result};

/// A response body delivered incrementally.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute target URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Creates a request without headers or body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Attaches a JSON body.
    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns true for methods that never change server state.
    pub fn is_safe_method(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD || self.method == Method::OPTIONS
    }
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Body chunks as they arrive.
    pub body: ByteStream,
}

impl HttpResponse {
    /// Creates a response with a fully-buffered body.
    pub fn from_bytes(status: u16, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self {
            status,
            headers: HeaderMap::new(),
            body: Box::pin(futures::stream::once(async move { Ok(body) })),
        }
    }

    /// Creates a response whose body is the given stream.
    pub fn from_stream(status: u16, body: ByteStream) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body,
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value as a string, if present and valid.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Reads the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Reads the whole body as UTF-8 text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(std::str::from_utf8(&bytes)?.to_string())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Executes HTTP requests.
///
/// `execute` resolves once response headers arrive; the body is read through
/// [`HttpResponse::body`].  Dropping the body stream must release the connection.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and returns the response head with a lazy body.
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transport")
    }
}

/// [`Transport`] backed by `reqwest` with an in-memory cookie jar.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
}

impl ReqwestTransport {
    /// Creates a transport.
    ///
    /// No overall request timeout is installed because streaming bodies are unbounded; callers
    /// bound non-streaming calls themselves.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = ReqwestClient::builder()
            .cookie_store(true)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self { client })
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(format!("Request timed out: {e}"), None)
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods() {
        let url = Url::parse("http://localhost/").unwrap();
        assert!(HttpRequest::new(Method::GET, url.clone()).is_safe_method());
        assert!(HttpRequest::new(Method::HEAD, url.clone()).is_safe_method());
        assert!(HttpRequest::new(Method::OPTIONS, url.clone()).is_safe_method());
        assert!(!HttpRequest::new(Method::POST, url.clone()).is_safe_method());
        assert!(!HttpRequest::new(Method::DELETE, url).is_safe_method());
    }

    #[tokio::test]
    async fn buffered_body_reads_back() {
        let response = HttpResponse::from_bytes(200, "hello");
        assert!(response.is_success());
        assert_eq!(response.text().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn streamed_body_concatenates() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Ok(Bytes::from_static(b"cd")),
        ]);
        let response = HttpResponse::from_stream(404, Box::pin(chunks));
        assert!(!response.is_success());
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"abcd"));
    }

    #[test]
    fn reqwest_transport_builds() {
        assert!(ReqwestTransport::new(Duration::from_secs(1)).is_ok());
    }
}
