//! Slash command parsing for the chat application.
//!
//! Lines starting with `/` control the session; everything else is sent as a message to the
//! current conversation.

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    /// Sign in.
    Login {
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },

    /// Create an account.
    Register {
        /// Account email.
        email: String,
        /// Display name.
        username: String,
        /// Account password.
        password: String,
    },

    /// Sign out.
    Logout,

    /// Show the signed-in user.
    Whoami,

    /// Dismiss the last sign-in error.
    Dismiss,

    /// Create a conversation, optionally titled, and switch to it.
    New(Option<String>),

    /// Switch to an existing conversation by id.
    Open(String),

    /// List known conversations.
    Conversations,

    /// Edit an earlier user message, branching from it.
    Edit {
        /// Id of the message to edit.
        message_id: String,
        /// Replacement text.
        content: String,
    },

    /// List the alternatives to a message.
    Branches(String),

    /// Make the branch through a message the active one.
    Switch(String),

    /// Show the active branch.
    History,

    /// Semantic search.
    Search(String),

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use workbench::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/search rust lifetimes").is_some());
/// assert!(parse_command("What is 2 + 2?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "login" => match words(argument).as_slice() {
            [email, password] => ChatCommand::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            _ => ChatCommand::Invalid("/login requires <email> <password>".to_string()),
        },
        "register" => match words(argument).as_slice() {
            [email, username, password] => ChatCommand::Register {
                email: email.to_string(),
                username: username.to_string(),
                password: password.to_string(),
            },
            _ => ChatCommand::Invalid(
                "/register requires <email> <username> <password>".to_string(),
            ),
        },
        "logout" => ChatCommand::Logout,
        "whoami" | "me" => ChatCommand::Whoami,
        "dismiss" => ChatCommand::Dismiss,
        "new" => ChatCommand::New(argument.map(|s| s.to_string())),
        "open" => required(argument, "/open requires a conversation id", |id| {
            ChatCommand::Open(id.to_string())
        }),
        "conversations" | "ls" => ChatCommand::Conversations,
        "edit" => parse_edit(argument),
        "branches" => required(argument, "/branches requires a message id", |id| {
            ChatCommand::Branches(id.to_string())
        }),
        "switch" => required(argument, "/switch requires a message id", |id| {
            ChatCommand::Switch(id.to_string())
        }),
        "history" => ChatCommand::History,
        "search" => required(argument, "/search requires a query", |q| {
            ChatCommand::Search(q.to_string())
        }),
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{command}")),
    };

    Some(result)
}

fn words(argument: Option<&str>) -> Vec<&str> {
    argument
        .map(|s| s.split_whitespace().collect())
        .unwrap_or_default()
}

fn required<F>(argument: Option<&str>, missing: &str, constructor: F) -> ChatCommand
where
    F: Fn(&str) -> ChatCommand,
{
    match argument {
        Some(arg) => constructor(arg),
        None => ChatCommand::Invalid(missing.to_string()),
    }
}

fn parse_edit(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/edit requires <message-id> <text>".to_string());
    };
    let mut parts = arg.splitn(2, ' ');
    let message_id = parts.next().unwrap_or_default();
    match parts.next().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        Some(content) => ChatCommand::Edit {
            message_id: message_id.to_string(),
            content: content.to_string(),
        },
        None => ChatCommand::Invalid("/edit requires replacement text".to_string()),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /login <email> <password>              Sign in
  /register <email> <username> <pass>    Create an account and sign in
  /logout                                Sign out
  /whoami                                Show the signed-in user
  /dismiss                               Dismiss the last sign-in error
  /new [title]                           Start a conversation
  /open <id>                             Switch to a conversation
  /conversations                         List conversations
  /history                               Show the active branch with message ids
  /edit <message-id> <text>              Edit a message as a new branch
  /branches <message-id>                 List alternatives to a message
  /switch <message-id>                   Show the branch through a message
  /search <query>                        Search your conversations
  /help                                  Show this help message
  /quit                                  Exit the chat
Press Ctrl+C while a reply is streaming to stop it."#
}
