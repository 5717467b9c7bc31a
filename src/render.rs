//! Output rendering for conversations and streamed replies.
//!
//! This module provides the [`Renderer`] trait and a plain-text implementation.  Renderers are
//! fed exchange snapshots; [`DraftCursor`] works out which part of a draft is new so that
//! coalesced snapshots still print every character exactly once.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::exchange::{ExchangeStatus, StreamExchange};
use crate::types::{Message, MessageRole};

/// ANSI escape code for dim text (used for metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the user's messages).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for stopped replies).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for failures).
const ANSI_RED: &str = "\x1b[31m";

/// Tracks how much of a growing draft has been printed.
#[derive(Debug, Default, Clone)]
pub struct DraftCursor {
    printed: usize,
}

impl DraftCursor {
    /// Creates a cursor at the start of a draft.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the unprinted tail of `draft` and advances past it.
    pub fn advance<'a>(&mut self, draft: &'a str) -> &'a str {
        let tail = draft.get(self.printed..).unwrap_or("");
        self.printed = draft.len();
        tail
    }
}

/// Trait for rendering conversation output.
///
/// This abstraction allows for different rendering strategies:
/// plain text with ANSI styling, or plain text without styling for piping.
pub trait Renderer: Send {
    /// Called when an exchange begins.
    fn start_reply(&mut self, exchange: &StreamExchange) {
        _ = exchange;
    }

    /// Print a chunk of reply text.
    ///
    /// This is called incrementally as fragments arrive.
    fn print_text(&mut self, text: &str);

    /// Print a stored message, as when showing history.
    fn print_message(&mut self, message: &Message);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called once with the terminal snapshot.
    fn finish_reply(&mut self, exchange: &StreamExchange);

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), use_color)
    }

    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: Box<dyn Write + Send>, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        if let Some(last) = text.chars().last() {
            self.line_start = last == '\n';
        }
        let _ = self.out.flush();
    }

    fn styled(&mut self, color: &str, text: &str) {
        if self.use_color {
            self.write(&format!("{color}{text}{ANSI_RESET}"));
        } else {
            self.write(text);
        }
    }

    fn end_line(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_message(&mut self, message: &Message) {
        self.end_line();
        match message.role {
            MessageRole::User => {
                self.styled(ANSI_CYAN, "> ");
                self.styled(ANSI_CYAN, &message.content);
            }
            MessageRole::Assistant => self.write(&message.content),
        }
        self.write("\n");
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        self.styled(ANSI_RED, &format!("Error: {error}"));
        self.write("\n");
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        self.write(info);
        self.write("\n");
    }

    fn finish_reply(&mut self, exchange: &StreamExchange) {
        self.end_line();
        match &exchange.status {
            ExchangeStatus::Stopped => self.styled(ANSI_YELLOW, "[stopped]\n"),
            ExchangeStatus::Failed(kind) => {
                let note = if exchange.assistant_draft.is_empty() {
                    format!("[{}]\n", kind.user_message())
                } else {
                    format!("[{}; partial reply not saved]\n", kind.user_message())
                };
                self.styled(ANSI_RED, &note);
            }
            ExchangeStatus::Complete if exchange.persisted_message_id.is_none() => {
                self.styled(ANSI_DIM, "[reply not saved]\n");
            }
            _ => {}
        }
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}
