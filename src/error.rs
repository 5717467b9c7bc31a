//! Error types for the Workbench client.
//!
//! Every failure the client can observe is folded into [`Error`].  Network and server failures
//! are converted at the point of the API call; callers such as the session store turn them into
//! state rather than letting them escape into rendering code.

use std::error;
use std::fmt;
use std::io;
use std::str::Utf8Error;
use std::sync::Arc;

/// Error code the server uses when a mutating request carries a missing or stale CSRF token.
pub const CSRF_VALIDATION_FAILED: &str = "CSRF_VALIDATION_FAILED";

type Cause = Arc<dyn error::Error + Send + Sync>;

fn cause(source: Option<Box<dyn error::Error + Send + Sync>>) -> Option<Cause> {
    source.map(Arc::from)
}

/// The main error type for the Workbench client.
#[derive(Clone, Debug)]
pub enum Error {
    /// A non-2xx reply without a more specific kind.
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Machine-readable error code from the body, if any.
        code: Option<String>,
        /// Human-readable error message.
        message: String,
        /// Value of `x-request-id`, if the server sent one.
        request_id: Option<String>,
    },

    /// Bad credentials, duplicate registration, or an unauthorized session.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// The server refused the request for the current user.
    Permission {
        /// Human-readable error message.
        message: String,
    },

    /// The CSRF token was missing, expired, or rejected.
    Csrf {
        /// Human-readable error message.
        message: String,
    },

    /// A conversation, message, or endpoint does not exist.
    NotFound {
        /// Human-readable error message.
        message: String,
        /// Kind of thing that was looked up.
        resource_type: Option<String>,
        /// Identifier that was looked up.
        resource_id: Option<String>,
    },

    /// HTTP 429.
    RateLimit {
        /// Human-readable error message.
        message: String,
        /// `retry-after`, in seconds.
        retry_after: Option<u64>,
    },

    /// HTTP 400.
    BadRequest {
        /// Human-readable error message.
        message: String,
    },

    /// A bounded request did not finish in time.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// The bound, in seconds.
        duration: Option<f64>,
    },

    /// The server could not be reached.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Cause>,
    },

    /// HTTP 500.
    InternalServer {
        /// Human-readable error message.
        message: String,
        /// Value of `x-request-id`, if the server sent one.
        request_id: Option<String>,
    },

    /// HTTP 502 to 504.
    ServiceUnavailable {
        /// Human-readable error message.
        message: String,
        /// `retry-after`, in seconds.
        retry_after: Option<u64>,
    },

    /// A body could not be encoded or decoded as JSON.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Cause>,
    },

    /// Reading a local file failed.
    Io {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Arc<io::Error>,
    },

    /// The HTTP stack failed below the level of a response.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Cause>,
    },

    /// Input rejected locally before any network call.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Field that failed validation.
        param: Option<String>,
    },

    /// A configured URL could not be parsed or joined.
    Url {
        /// Underlying cause.
        source: url::ParseError,
    },

    /// The response body broke off mid-stream.
    Streaming {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Cause>,
    },

    /// The response body was not valid UTF-8.
    Encoding {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Cause>,
    },

    /// An exchange is already pending or streaming for this conversation.
    ExchangeActive {
        /// The conversation that is busy.
        conversation_id: String,
    },
}

impl Error {
    /// A non-2xx reply without a more specific kind.
    pub fn api(
        status_code: u16,
        code: Option<String>,
        message: impl Into<String>,
        request_id: Option<String>,
    ) -> Self {
        Error::Api {
            status_code,
            code,
            message: message.into(),
            request_id,
        }
    }

    /// Authentication failed or no session exists.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// The current user may not do this.
    pub fn permission(message: impl Into<String>) -> Self {
        Error::Permission {
            message: message.into(),
        }
    }

    /// The server rejected the CSRF token.
    pub fn csrf(message: impl Into<String>) -> Self {
        Error::Csrf {
            message: message.into(),
        }
    }

    /// Something that was looked up does not exist.
    pub fn not_found(
        message: impl Into<String>,
        resource_type: Option<String>,
        resource_id: Option<String>,
    ) -> Self {
        Error::NotFound {
            message: message.into(),
            resource_type,
            resource_id,
        }
    }

    pub fn rate_limit(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: message.into(),
            retry_after,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest {
            message: message.into(),
        }
    }

    /// A bounded call ran out of time.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn internal_server(message: impl Into<String>, request_id: Option<String>) -> Self {
        Error::InternalServer {
            message: message.into(),
            request_id,
        }
    }

    pub fn service_unavailable(message: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::ServiceUnavailable {
            message: message.into(),
            retry_after,
        }
    }

    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: cause(source),
        }
    }

    /// Input rejected before any network call.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// The response body broke off.
    pub fn streaming(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Streaming {
            message: message.into(),
            source: cause(source),
        }
    }

    pub fn encoding(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Encoding {
            message: message.into(),
            source: cause(source),
        }
    }

    /// The conversation already has a running exchange.
    pub fn exchange_active(conversation_id: impl Into<String>) -> Self {
        Error::ExchangeActive {
            conversation_id: conversation_id.into(),
        }
    }

    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Permission { .. })
    }

    /// True if the server rejected the CSRF token.
    pub fn is_csrf(&self) -> bool {
        matches!(self, Error::Csrf { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True if the input was rejected locally.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// True if another exchange was already active.
    pub fn is_exchange_active(&self) -> bool {
        matches!(self, Error::ExchangeActive { .. })
    }

    /// True if the request never produced a server verdict.
    ///
    /// These are the failures shown to users as "Network error" or "Response interrupted".
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. }
                | Error::Timeout { .. }
                | Error::HttpClient { .. }
                | Error::Streaming { .. }
        )
    }

    /// The HTTP status behind this error, if it came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Api { status_code, .. } => Some(*status_code),
            Error::Authentication { .. } => Some(401),
            Error::Permission { .. } | Error::Csrf { .. } => Some(403),
            Error::NotFound { .. } => Some(404),
            Error::RateLimit { .. } => Some(429),
            Error::BadRequest { .. } => Some(400),
            Error::InternalServer { .. } => Some(500),
            _ => None,
        }
    }

    /// Returns the bare message suitable for showing to a user.
    ///
    /// Unlike `Display`, no category prefix is added.  Network-level failures collapse to
    /// "Network error".
    pub fn user_message(&self) -> String {
        match self {
            Error::Api { message, .. }
            | Error::Authentication { message }
            | Error::Permission { message }
            | Error::Csrf { message }
            | Error::NotFound { message, .. }
            | Error::RateLimit { message, .. }
            | Error::BadRequest { message }
            | Error::InternalServer { message, .. }
            | Error::ServiceUnavailable { message, .. }
            | Error::Validation { message, .. } => message.clone(),
            Error::Connection { .. }
            | Error::Timeout { .. }
            | Error::HttpClient { .. }
            | Error::Streaming { .. } => "Network error".to_string(),
            Error::ExchangeActive { .. } => {
                "A response is already being generated for this conversation".to_string()
            }
            Error::Serialization { .. }
            | Error::Io { .. }
            | Error::Url { .. }
            | Error::Encoding { .. } => self.to_string(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Api {
                status_code,
                code,
                message,
                request_id,
            } => {
                let code = code.as_deref().unwrap_or("API error");
                write!(f, "{code} (HTTP {status_code}): {message}")?;
                if let Some(request_id) = request_id {
                    write!(f, " (request {request_id})")?;
                }
                Ok(())
            }
            Error::Authentication { message } => write!(f, "Authentication error: {message}"),
            Error::Permission { message } => write!(f, "Permission error: {message}"),
            Error::Csrf { message } => write!(f, "CSRF validation failed: {message}"),
            Error::NotFound {
                message,
                resource_type,
                resource_id,
            } => {
                match resource_type {
                    Some(kind) => write!(f, "Not found ({kind}): {message}")?,
                    None => write!(f, "Not found: {message}")?,
                }
                if let Some(id) = resource_id {
                    write!(f, " [{id}]")?;
                }
                Ok(())
            }
            Error::RateLimit {
                message,
                retry_after,
            }
            | Error::ServiceUnavailable {
                message,
                retry_after,
            } => {
                let label = if matches!(self, Error::RateLimit { .. }) {
                    "Rate limited"
                } else {
                    "Service unavailable"
                };
                write!(f, "{label}: {message}")?;
                if let Some(secs) = retry_after {
                    write!(f, " (retry after {secs}s)")?;
                }
                Ok(())
            }
            Error::BadRequest { message } => write!(f, "Bad request: {message}"),
            Error::Timeout { message, duration } => match duration {
                Some(secs) => write!(f, "Timed out: {message} after {secs}s"),
                None => write!(f, "Timed out: {message}"),
            },
            Error::Connection { message, .. } => write!(f, "Connection error: {message}"),
            Error::InternalServer {
                message,
                request_id,
            } => {
                write!(f, "Internal server error: {message}")?;
                if let Some(request_id) = request_id {
                    write!(f, " (request {request_id})")?;
                }
                Ok(())
            }
            Error::Serialization { message, .. } => write!(f, "Serialization error: {message}"),
            Error::Io { message, .. } => write!(f, "I/O error: {message}"),
            Error::HttpClient { message, .. } => write!(f, "HTTP client error: {message}"),
            Error::Validation { message, param } => match param {
                Some(param) => write!(f, "Invalid {param}: {message}"),
                None => write!(f, "Invalid input: {message}"),
            },
            Error::Url { source } => write!(f, "Invalid URL: {source}"),
            Error::Streaming { message, .. } => write!(f, "Stream interrupted: {message}"),
            Error::Encoding { message, .. } => write!(f, "Encoding error: {message}"),
            Error::ExchangeActive { conversation_id } => {
                write!(f, "Exchange already active for conversation {conversation_id}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. }
            | Error::Serialization { source, .. }
            | Error::HttpClient { source, .. }
            | Error::Streaming { source, .. }
            | Error::Encoding { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source.as_ref()),
            Error::Url { source } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(source: url::ParseError) -> Self {
        Error::Url { source }
    }
}

impl From<Utf8Error> for Error {
    fn from(err: Utf8Error) -> Self {
        Error::encoding(format!("UTF-8 error: {err}"), Some(Box::new(err)))
    }
}

/// A specialized Result type for Workbench operations.
pub type Result<T> = std::result::Result<T, Error>;
