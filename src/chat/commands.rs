//! Slash command parsing for the chat application.
//!
//! Input that starts with `/` controls the session, contexts and documents;
//! everything else is a chat message for the current context.

use crate::types::{ChatMode, OAuthProvider};

/// How `/login` signs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginMethod {
    /// Email and password; the password is prompted for.
    Password(String),
    /// A third-party provider; the callback URL is pasted back.
    OAuth(OAuthProvider),
}

/// A parsed chat command.
///
/// These commands are handled locally and never sent as chat messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Sign in.
    Login(LoginMethod),

    /// Sign out.
    Logout,

    /// Show the signed-in user.
    WhoAmI,

    /// List contexts.
    Contexts,

    /// Switch to a context.
    Use(String),

    /// Create a context from PDFs.
    New {
        /// Context name.
        name: String,
        /// Paths of the PDFs to upload.
        files: Vec<String>,
    },

    /// List documents in the current context.
    Docs,

    /// Upload a PDF into the current context.
    Upload(String),

    /// Set the chat mode.
    Mode(ChatMode),

    /// Show the current conversation.
    History,

    /// Clear the current conversation on the backend.
    Clear,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a command, or `None` if it
/// should be sent as a chat message.
///
/// # Examples
///
/// ```
/// # use docchat::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/use 6f1c").is_some());
/// assert!(parse_command("What does the paper conclude?").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    let rest = input.strip_prefix('/')?;
    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "login" => parse_login(argument),
        "logout" => ChatCommand::Logout,
        "whoami" | "me" => ChatCommand::WhoAmI,
        "contexts" | "ls" => ChatCommand::Contexts,
        "use" => match argument {
            Some(id) if !id.contains(' ') => ChatCommand::Use(id.to_string()),
            Some(_) => ChatCommand::Invalid("/use takes a single context id".to_string()),
            None => ChatCommand::Invalid("/use requires a context id".to_string()),
        },
        "new" => parse_new(argument),
        "docs" => ChatCommand::Docs,
        "upload" => match argument {
            Some(path) => ChatCommand::Upload(path.to_string()),
            None => ChatCommand::Invalid("/upload requires a file path".to_string()),
        },
        "mode" => match argument.map(str::parse::<ChatMode>) {
            Some(Ok(mode)) => ChatCommand::Mode(mode),
            Some(Err(_)) | None => {
                ChatCommand::Invalid("/mode expects 'standard' or 'deep'".to_string())
            }
        },
        "history" => ChatCommand::History,
        "clear" => ChatCommand::Clear,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_login(argument: Option<&str>) -> ChatCommand {
    match argument {
        Some(arg) if arg.eq_ignore_ascii_case("google") => {
            ChatCommand::Login(LoginMethod::OAuth(OAuthProvider::Google))
        }
        Some(arg) if arg.eq_ignore_ascii_case("github") => {
            ChatCommand::Login(LoginMethod::OAuth(OAuthProvider::GitHub))
        }
        Some(email) if email.contains('@') && !email.contains(' ') => {
            ChatCommand::Login(LoginMethod::Password(email.to_string()))
        }
        Some(_) | None => ChatCommand::Invalid(
            "/login expects an email address, 'google', or 'github'".to_string(),
        ),
    }
}

fn parse_new(argument: Option<&str>) -> ChatCommand {
    let Some(arg) = argument else {
        return ChatCommand::Invalid("/new requires a name and at least one PDF".to_string());
    };
    let mut words = arg.split_whitespace();
    let Some(name) = words.next() else {
        return ChatCommand::Invalid("/new requires a name and at least one PDF".to_string());
    };
    let files: Vec<String> = words.map(String::from).collect();
    if files.is_empty() {
        return ChatCommand::Invalid("/new requires at least one PDF".to_string());
    }
    ChatCommand::New {
        name: name.to_string(),
        files,
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /login <email>         Sign in with email and password
  /login google|github   Sign in through a provider
  /logout                Sign out
  /whoami                Show the signed-in user
  /contexts              List your contexts
  /use <id>              Chat with a context
  /new <name> <pdf>...   Create a context from PDFs
  /docs                  List documents in the current context
  /upload <pdf>          Add a PDF to the current context
  /mode standard|deep    Set the retrieval mode
  /history               Show the conversation
  /clear                 Clear the conversation
  /help                  Show this help message
  /quit                  Exit the chat
Ctrl+C while an answer streams abandons it."#
}
