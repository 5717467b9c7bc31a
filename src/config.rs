//! Client configuration.
//!
//! A [`ClientConfig`] can be built in code, read from the environment, or loaded from a YAML
//! file.  Command-line flags for the chat binary are layered on top in `chat::config`.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversation::BranchRetention;
use crate::error::{Error, Result};

/// Base URL used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/";

/// Upper bound for non-streaming calls such as login or the CSRF fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for establishing a TCP/TLS connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved configuration for a [`crate::Workbench`] client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Origin and path prefix of the backend.  Always ends with `/`.
    pub base_url: Url,

    /// Deadline for non-streaming requests.  Streaming bodies are not bounded.
    pub timeout: Duration,

    /// Deadline for connection establishment, streaming included.
    pub connect_timeout: Duration,

    /// What happens to the descendants of an edited message.
    pub branch_retention: BranchRetention,
}

impl ClientConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - Base URL: `http://localhost:8000/`
    /// - Timeout: 30 seconds
    /// - Connect timeout: 10 seconds
    /// - Branch retention: preserve all branches
    pub fn new() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_API_URL).expect("default API URL should be valid"),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            branch_retention: BranchRetention::default(),
        }
    }

    /// Reads `WORKBENCH_API_URL` and `WORKBENCH_TIMEOUT_SECS`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::new();
        if let Ok(url) = env::var("WORKBENCH_API_URL") {
            config = config.with_base_url(&url)?;
        }
        if let Ok(secs) = env::var("WORKBENCH_TIMEOUT_SECS") {
            let secs = secs.trim().parse::<u64>().map_err(|_| {
                Error::validation(
                    format!("WORKBENCH_TIMEOUT_SECS must be an integer, got {secs:?}"),
                    Some("WORKBENCH_TIMEOUT_SECS".to_string()),
                )
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Loads a YAML configuration file.  Missing keys keep their defaults.
    ///
    /// ```yaml
    /// api_url: "https://workbench.example.com/"
    /// timeout_secs: 15
    /// branch_retention: prune-descendants
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|err| {
            Error::io(format!("failed to read config {}", path.display()), err)
        })?;
        let file: ConfigFile = serde_yaml::from_str(&content).map_err(|err| {
            Error::serialization(
                format!("failed to parse config {}: {err}", path.display()),
                Some(Box::new(err)),
            )
        })?;
        file.apply(Self::new())
    }

    /// Sets the base URL.  A trailing slash is added when missing.
    pub fn with_base_url(mut self, url: &str) -> Result<Self> {
        self.base_url = parse_base_url(url)?;
        Ok(self)
    }

    /// Sets the non-streaming request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the branch retention policy.
    pub fn with_branch_retention(mut self, retention: BranchRetention) -> Self {
        self.branch_retention = retention;
        self
    }

    /// Resolves an API path such as `api/v1/auth/me` against the base URL.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk form of [`ClientConfig`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    connect_timeout_secs: Option<u64>,
    #[serde(default)]
    branch_retention: Option<BranchRetention>,
}

impl ConfigFile {
    fn apply(self, mut config: ClientConfig) -> Result<ClientConfig> {
        if let Some(url) = self.api_url {
            config = config.with_base_url(&url)?;
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(retention) = self.branch_retention {
            config.branch_retention = retention;
        }
        Ok(config)
    }
}

fn parse_base_url(url: &str) -> Result<Url> {
    let mut url = Url::parse(url.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(
            format!("unsupported URL scheme {:?}", url.scheme()),
            Some("api_url".to_string()),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ClientConfig::new();
        assert_eq!(config.base_url.as_str(), DEFAULT_API_URL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.branch_retention, BranchRetention::PreserveAll);
    }

    #[test]
    fn base_url_gets_trailing_slash() {
        let config = ClientConfig::new()
            .with_base_url("https://example.com/workbench")
            .unwrap();
        assert_eq!(config.base_url.as_str(), "https://example.com/workbench/");
        assert_eq!(
            config.endpoint("/api/v1/auth/me").unwrap().as_str(),
            "https://example.com/workbench/api/v1/auth/me"
        );
    }

    #[test]
    fn rejects_non_http_scheme() {
        let err = ClientConfig::new()
            .with_base_url("ftp://example.com/")
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn builder_pattern() {
        let config = ClientConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(2))
            .with_branch_retention(BranchRetention::PruneDescendants);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.branch_retention, BranchRetention::PruneDescendants);
    }

    #[test]
    fn config_file_overrides() {
        let file: ConfigFile = serde_yaml::from_str(
            "api_url: https://wb.example.com\ntimeout_secs: 7\nbranch_retention: prune-descendants\n",
        )
        .unwrap();
        let config = file.apply(ClientConfig::new()).unwrap();
        assert_eq!(config.base_url.as_str(), "https://wb.example.com/");
        assert_eq!(config.timeout, Duration::from_secs(7));
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.branch_retention, BranchRetention::PruneDescendants);
    }
}
