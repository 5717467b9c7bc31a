//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the layering of flags over the
//! environment and an optional YAML file.

use std::path::PathBuf;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::ClientConfig;
use crate::conversation::BranchRetention;
use crate::error::Result;

/// Command-line arguments for the workbench-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Backend base URL.
    #[arrrg(optional, "Backend URL (default: http://localhost:8000/)", "URL")]
    pub api_url: Option<String>,

    /// Timeout for non-streaming requests, in seconds.
    #[arrrg(optional, "Request timeout in seconds (default: 30)", "SECS")]
    pub timeout: Option<u32>,

    /// YAML configuration file.
    #[arrrg(optional, "Path to a YAML configuration file", "PATH")]
    pub config: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Discard replies below an edited message.
    #[arrrg(flag, "Discard the old branch when editing a message")]
    pub prune_branches: bool,
}

/// Configuration for a chat run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Settings for the API client.
    pub client: ClientConfig,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    pub fn new() -> Self {
        Self {
            client: ClientConfig::new(),
            use_color: true,
        }
    }

    /// Sets the client configuration.
    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Resolves arguments over a base configuration.
    ///
    /// The base comes from `--config` when given, otherwise from the environment.  Flags win.
    pub fn resolve(args: ChatArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => ClientConfig::from_file(PathBuf::from(path))?,
            None => ClientConfig::from_env()?,
        };
        Self::layer(base, args)
    }

    fn layer(mut client: ClientConfig, args: ChatArgs) -> Result<Self> {
        if let Some(url) = &args.api_url {
            client = client.with_base_url(url)?;
        }
        if let Some(secs) = args.timeout {
            client = client.with_timeout(Duration::from_secs(u64::from(secs)));
        }
        if args.prune_branches {
            client = client.with_branch_retention(BranchRetention::PruneDescendants);
        }
        Ok(ChatConfig {
            client,
            use_color: !args.no_color,
        })
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ChatConfig::new();
        assert!(config.use_color);
        assert_eq!(config.client, ClientConfig::new());
    }

    #[test]
    fn flags_layer_over_base() {
        let args = ChatArgs {
            api_url: Some("https://workbench.example.com".to_string()),
            timeout: Some(5),
            config: None,
            no_color: true,
            prune_branches: true,
        };
        let config = ChatConfig::layer(ClientConfig::new(), args).unwrap();
        assert_eq!(
            config.client.base_url.as_str(),
            "https://workbench.example.com/"
        );
        assert_eq!(config.client.timeout, Duration::from_secs(5));
        assert_eq!(
            config.client.branch_retention,
            BranchRetention::PruneDescendants
        );
        assert!(!config.use_color);
    }

    #[test]
    fn empty_args_keep_base() {
        let base = ClientConfig::new().with_timeout(Duration::from_secs(9));
        let config = ChatConfig::layer(base.clone(), ChatArgs::default()).unwrap();
        assert_eq!(config.client, base);
        assert!(config.use_color);
    }

    #[test]
    fn bad_url_is_rejected() {
        let args = ChatArgs {
            api_url: Some("ftp://nope".to_string()),
            ..ChatArgs::default()
        };
        assert!(ChatConfig::layer(ClientConfig::new(), args).is_err());
    }
}
