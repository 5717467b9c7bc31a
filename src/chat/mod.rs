//! Chat application module for the interactive Workbench client.
//!
//! This module provides a streaming REPL built on top of the workbench client library.
//! It supports:
//!
//! - Session rehydration on start, sign-in, registration and sign-out
//! - Streaming replies with real-time display and Ctrl+C to stop
//! - Editing earlier messages as branches, and navigating between branches
//! - Slash commands for session control
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`app`]: application state over the session store and streaming controller
//! - [`commands`]: slash command parsing

mod app;
mod commands;
mod config;

pub use crate::render::{DraftCursor, PlainTextRenderer, Renderer};
pub use app::ChatApp;
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
