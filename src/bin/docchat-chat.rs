//! Interactive terminal client for chatting with uploaded documents.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend, keeping the session in memory
//! docchat-chat
//!
//! # Keep the session between runs and open a context right away
//! docchat-chat --store ~/.docchat/session.json --context 6f1c
//!
//! # Point at another backend
//! docchat-chat --api-url https://chat.example.com/api
//! ```
//!
//! # Commands
//!
//! - `/login <email>` - Sign in
//! - `/contexts` - List contexts
//! - `/use <id>` - Chat with a context
//! - `/help` - Show every command
//! - `/quit` - Exit the application

use std::sync::{Arc, Mutex};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use url::Url;

use docchat::chat::{
    ChatCommand, LoginMethod, PlainTextRenderer, Renderer, help_text, parse_command,
};
use docchat::{
    ApiClient, ChatMode, ChatRole, ClientConfig, Conversation, DocChatArgs, SessionEvent,
    StreamState, UploadFile,
};

/// Main entry point for the docchat-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let (args, _) = DocChatArgs::from_command_line_relaxed("docchat-chat [OPTIONS]");
    let config = ClientConfig::resolve(&args)?;
    let mut mode = args.chat_mode()?;

    let client = ApiClient::from_config(&config)?;
    let mut events = client.session().subscribe();
    let mut renderer = PlainTextRenderer::with_color(!args.no_color);
    let mut rl = DefaultEditor::new()?;

    // Cancels the answer currently streaming, if any.
    let streaming: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
    let streaming_clone = streaming.clone();
    ctrlc::set_handler(move || {
        if let Ok(current) = streaming_clone.lock() {
            if let Some(cancel) = current.as_ref() {
                cancel.cancel();
            }
        }
    })?;

    println!("Document Chat ({})", config.api_url);
    match client.session().init().await {
        Ok(Some(user)) => println!("Signed in as {}", user.display_name()),
        Ok(None) => println!("Not signed in; use /login <email>"),
        Err(err) => renderer.print_error(&format!("Could not restore session: {err}")),
    }
    println!("Type /help for commands, /quit to exit\n");

    let mut conversation = None;
    if let Some(context_id) = args.context.as_deref() {
        conversation = open_conversation(&client, context_id, &mut renderer).await;
    }

    loop {
        report_session_events(&mut events, &mut renderer);

        let prompt = match &conversation {
            Some(conversation) => format!("[{}] You: ", conversation.context_id()),
            None => "You: ".to_string(),
        };
        let readline = rl.readline(&prompt);

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    if cmd == ChatCommand::Quit {
                        println!("Goodbye!");
                        break;
                    }
                    handle_command(
                        cmd,
                        &client,
                        &mut conversation,
                        &mut mode,
                        &mut rl,
                        &mut renderer,
                    )
                    .await;
                    continue;
                }

                let Some(current) = conversation.as_mut() else {
                    renderer.print_error("No context selected; use /contexts and /use <id>");
                    continue;
                };
                let cancel = CancellationToken::new();
                set_streaming(&streaming, Some(cancel.clone()));
                println!("Assistant:");
                let result = current
                    .send_with_cancel(line, mode, &mut renderer, cancel)
                    .await;
                set_streaming(&streaming, None);
                match result {
                    Ok(session) if session.state == StreamState::Abandoned => {
                        renderer.print_interrupted()
                    }
                    Ok(_) => renderer.finish_response(),
                    Err(err) => renderer.print_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn set_streaming(slot: &Mutex<Option<CancellationToken>>, cancel: Option<CancellationToken>) {
    if let Ok(mut current) = slot.lock() {
        *current = cancel;
    }
}

fn report_session_events(
    events: &mut broadcast::Receiver<SessionEvent>,
    renderer: &mut PlainTextRenderer,
) {
    loop {
        match events.try_recv() {
            Ok(SessionEvent::LoginRequired) => {
                renderer.print_info("Your session has expired; sign in again with /login")
            }
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

async fn open_conversation(
    client: &ApiClient,
    context_id: &str,
    renderer: &mut PlainTextRenderer,
) -> Option<Conversation> {
    let context = match client.get_context(context_id).await {
        Ok(context) => context,
        Err(err) => {
            renderer.print_error(&err.to_string());
            return None;
        }
    };
    let mut conversation = Conversation::new(context.id.clone(), client.clone());
    match conversation.load_history().await {
        Ok(turns) => renderer.print_info(&format!(
            "Using {} ({} documents, {} earlier messages)",
            context.name,
            context.document_count,
            turns.len()
        )),
        Err(err) => renderer.print_error(&format!("Could not load history: {err}")),
    }
    Some(conversation)
}

async fn handle_command(
    cmd: ChatCommand,
    client: &ApiClient,
    conversation: &mut Option<Conversation>,
    mode: &mut ChatMode,
    rl: &mut DefaultEditor,
    renderer: &mut PlainTextRenderer,
) {
    let session = client.session();
    match cmd {
        ChatCommand::Login(LoginMethod::Password(email)) => {
            let password = match rl.readline("Password: ") {
                Ok(password) => password,
                Err(_) => return,
            };
            match session.login_with_password(&email, password.trim()).await {
                Ok(user) => renderer.print_info(&format!("Signed in as {}", user.display_name())),
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Login(LoginMethod::OAuth(provider)) => {
            match session.oauth_login_url(provider) {
                Ok(url) => renderer.print_info(&format!("Open this URL to sign in:\n  {url}")),
                Err(err) => {
                    renderer.print_error(&err.to_string());
                    return;
                }
            }
            let callback = match rl.readline("Paste the URL you were redirected to: ") {
                Ok(callback) => callback,
                Err(_) => return,
            };
            let callback = match Url::parse(callback.trim()) {
                Ok(callback) => callback,
                Err(err) => {
                    renderer.print_error(&format!("Not a URL: {err}"));
                    return;
                }
            };
            match session.login_from_callback(&callback).await {
                Ok(user) => renderer.print_info(&format!("Signed in as {}", user.display_name())),
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Logout => {
            session.logout().await;
            *conversation = None;
            renderer.print_info("Signed out.");
        }
        ChatCommand::WhoAmI => match client.me().await {
            Ok(user) => renderer.print_info(&format!("{} <{}>", user.display_name(), user.email)),
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Contexts => match client.list_contexts().await {
            Ok(contexts) if contexts.is_empty() => {
                renderer.print_info("No contexts yet; create one with /new <name> <pdf>...")
            }
            Ok(contexts) => {
                for context in contexts {
                    println!(
                        "    {}  {} ({} documents)",
                        context.id, context.name, context.document_count
                    );
                }
            }
            Err(err) => renderer.print_error(&err.to_string()),
        },
        ChatCommand::Use(context_id) => {
            if let Some(opened) = open_conversation(client, &context_id, renderer).await {
                *conversation = Some(opened);
            }
        }
        ChatCommand::New { name, files } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in &files {
                match UploadFile::from_path(path) {
                    Ok(file) => uploads.push(file),
                    Err(err) => {
                        renderer.print_error(&err.to_string());
                        return;
                    }
                }
            }
            match client.create_context(&name, uploads).await {
                Ok(context) => {
                    renderer.print_info(&format!("Created {} ({})", context.name, context.id));
                    *conversation = Some(Conversation::new(context.id, client.clone()));
                }
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Docs => {
            let Some(current) = conversation.as_ref() else {
                renderer.print_error("No context selected");
                return;
            };
            match client.list_documents(current.context_id()).await {
                Ok(documents) => {
                    for document in documents {
                        println!(
                            "    {}  {} [{:?}]",
                            document.id, document.filename, document.status
                        );
                    }
                }
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Upload(path) => {
            let Some(current) = conversation.as_ref() else {
                renderer.print_error("No context selected");
                return;
            };
            let file = match UploadFile::from_path(&path) {
                Ok(file) => file,
                Err(err) => {
                    renderer.print_error(&err.to_string());
                    return;
                }
            };
            match client.upload_document(current.context_id(), file).await {
                Ok(uploaded) => renderer.print_info(&format!(
                    "Uploaded as {} {}",
                    uploaded.document_id, uploaded.message
                )),
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Mode(new_mode) => {
            *mode = new_mode;
            renderer.print_info(&format!("Mode set to {new_mode}"));
        }
        ChatCommand::History => {
            let Some(current) = conversation.as_ref() else {
                renderer.print_error("No context selected");
                return;
            };
            for turn in current.messages() {
                let who = match turn.role {
                    ChatRole::User => "You",
                    ChatRole::Assistant => "Assistant",
                };
                println!("{who}: {}", turn.content);
            }
        }
        ChatCommand::Clear => {
            let Some(current) = conversation.as_mut() else {
                renderer.print_error("No context selected");
                return;
            };
            match current.clear().await {
                Ok(()) => renderer.print_info("Conversation cleared."),
                Err(err) => renderer.print_error(&err.to_string()),
            }
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::Quit => {}
        ChatCommand::Invalid(message) => renderer.print_error(&message),
    }
}
