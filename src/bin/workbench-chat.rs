//! Interactive chat client for the Workbench API.
//!
//! This binary provides a streaming REPL over the session store and the streaming chat
//! controller.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage against http://localhost:8000/
//! workbench-chat
//!
//! # Point at another backend
//! workbench-chat --api-url https://workbench.example.com/
//!
//! # Discard old replies when editing a message
//! workbench-chat --prune-branches
//!
//! # Verbose logging
//! RUST_LOG=workbench=debug workbench-chat
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/login <email> <password>` - Sign in
//! - `/new [title]` - Start a conversation
//! - `/history` - Show the active branch
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use workbench::chat::{
    ChatApp, ChatArgs, ChatCommand, ChatConfig, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use workbench::{Error, ErrorBoundary, Message, Session, TracingLogger};

/// Main entry point for the workbench-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("workbench-chat [OPTIONS]");
    let config = ChatConfig::resolve(args)?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let mut renderer =
        PlainTextRenderer::with_color(config.use_color).with_interrupt(interrupted.clone());
    let boundary = ErrorBoundary::new("workbench-chat", Arc::new(TracingLogger));
    let mut app = ChatApp::new(&config)?;
    let mut rl = DefaultEditor::new()?;

    println!("Workbench Chat ({})", config.client.base_url);
    let session = app.start().await;
    print_session(&mut renderer, &session);
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);

        let prompt = match app.current() {
            Some(id) => format!("[{}] You: ", short(id)),
            None => "You: ".to_string(),
        };
        let line = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let Some(command) = parse_command(line) else {
            if let Err(err) = app.send(line, &mut renderer).await {
                report(&mut renderer, &err);
            }
            continue;
        };

        match command {
            ChatCommand::Quit => {
                println!("Goodbye!");
                break;
            }
            ChatCommand::Help => {
                for line in help_text().lines() {
                    println!("    {line}");
                }
            }
            ChatCommand::Login { email, password } => {
                let session = app.login(&email, &password).await;
                print_session(&mut renderer, &session);
            }
            ChatCommand::Register {
                email,
                username,
                password,
            } => {
                let session = app.register(&email, &username, &password).await;
                print_session(&mut renderer, &session);
            }
            ChatCommand::Logout => {
                app.logout().await;
                renderer.print_info("Signed out.");
            }
            ChatCommand::Whoami => {
                let session = app.session().snapshot();
                print_session(&mut renderer, &session);
            }
            ChatCommand::Dismiss => {
                app.session().clear_error();
            }
            ChatCommand::New(title) => match app.new_conversation(title).await {
                Ok(conversation) => {
                    renderer.print_info(&format!("Started conversation {}", conversation.id))
                }
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::Open(id) => match app.open(&id).await {
                Ok(()) => print_messages(&boundary, &mut renderer, app.history().await),
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::Conversations => match app.conversations().await {
                Ok(conversations) if conversations.is_empty() => {
                    renderer.print_info("No conversations yet.")
                }
                Ok(conversations) => {
                    for conversation in conversations {
                        let title = conversation.title.as_deref().unwrap_or("(untitled)");
                        renderer.print_info(&format!("  {}  {title}", conversation.id));
                    }
                }
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::History => print_messages(&boundary, &mut renderer, app.history().await),
            ChatCommand::Edit {
                message_id,
                content,
            } => match app.edit(&message_id, &content, &mut renderer).await {
                Ok(Some(_)) => {}
                Ok(None) => renderer.print_info("Message unchanged."),
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::Branches(message_id) => match app.branches(&message_id).await {
                Ok(siblings) => {
                    for (index, message) in siblings.iter().enumerate() {
                        renderer.print_info(&format!(
                            "  {}/{}  {}  {}",
                            index + 1,
                            siblings.len(),
                            message.id,
                            message.content
                        ));
                    }
                }
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::Switch(message_id) => {
                print_messages(&boundary, &mut renderer, app.switch(&message_id).await)
            }
            ChatCommand::Search(query) => match app.search(&query).await {
                Ok(results) if results.results.is_empty() => renderer.print_info("No matches."),
                Ok(results) => {
                    for hit in results.results {
                        renderer.print_info(&format!(
                            "  {}  {}",
                            short(&hit.conversation_id),
                            hit.content
                        ));
                    }
                }
                Err(err) => report(&mut renderer, &err),
            },
            ChatCommand::Invalid(message) => renderer.print_error(&message),
        }
    }

    Ok(())
}

fn print_session(renderer: &mut PlainTextRenderer, session: &Session) {
    match (&session.user, &session.error) {
        (Some(user), _) => {
            renderer.print_info(&format!("Signed in as {} <{}>", user.username, user.email))
        }
        (None, Some(error)) => renderer.print_error(error),
        (None, None) => renderer.print_info("Not signed in. Use /login or /register."),
    }
}

fn print_messages(
    boundary: &ErrorBoundary,
    renderer: &mut PlainTextRenderer,
    messages: Result<Vec<Message>, Error>,
) {
    let messages = match messages {
        Ok(messages) => messages,
        Err(err) => return report(renderer, &err),
    };
    if messages.is_empty() {
        renderer.print_info("(no messages)");
        return;
    }
    let outcome = boundary.child("history").render(|| {
        for message in &messages {
            renderer.print_info(&format!("[{}]", message.id));
            renderer.print_message(message);
        }
    });
    if let workbench::BoundaryOutcome::Recovered { message, .. } = outcome {
        renderer.print_error(&format!("{message} Run /history to retry."));
    }
}

fn report(renderer: &mut PlainTextRenderer, err: &Error) {
    renderer.print_error(&err.user_message());
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
