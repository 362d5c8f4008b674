//! Chat turn bookkeeping for one context.

use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::stream::{ChatRequest, ChatStreamClient, StreamHandler, StreamSession, StreamState};
use crate::types::{ChatMode, ChatTurn, Source};

/// The turns of one context's conversation.
///
/// `send` takes `&mut self`, so a conversation never has more than one
/// open assistant turn.
pub struct Conversation {
    context_id: String,
    client: ApiClient,
    streams: ChatStreamClient,
    turns: Vec<ChatTurn>,
    last_error: Option<Error>,
}

impl Conversation {
    /// An empty conversation over `context_id`.
    pub fn new(context_id: impl Into<String>, client: ApiClient) -> Self {
        let streams = ChatStreamClient::new(client.session().clone());
        Self {
            context_id: context_id.into(),
            client,
            streams,
            turns: Vec::new(),
            last_error: None,
        }
    }

    /// The context this conversation is about.
    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    /// Every turn so far, oldest first.
    pub fn messages(&self) -> &[ChatTurn] {
        &self.turns
    }

    /// The error that ended the most recent send, if it failed.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Replace the local turns with the backend's history.
    pub async fn load_history(&mut self) -> Result<&[ChatTurn]> {
        self.turns = self.client.chat_history(&self.context_id).await?;
        Ok(&self.turns)
    }

    /// Forget the conversation, on the backend and locally.
    pub async fn clear(&mut self) -> Result<()> {
        self.client.clear_chat_history(&self.context_id).await?;
        self.turns.clear();
        self.last_error = None;
        Ok(())
    }

    /// Send `message` and stream the answer into a new assistant turn.
    ///
    /// `observer` sees every callback the turn does.  An empty message is
    /// rejected without touching the conversation.
    pub async fn send<O>(
        &mut self,
        message: &str,
        mode: ChatMode,
        observer: &mut O,
    ) -> Result<StreamSession>
    where
        O: StreamHandler + ?Sized,
    {
        self.send_with_cancel(message, mode, observer, CancellationToken::new())
            .await
    }

    /// Like [`Conversation::send`], abandoning the stream when `cancel` fires.
    pub async fn send_with_cancel<O>(
        &mut self,
        message: &str,
        mode: ChatMode,
        observer: &mut O,
        cancel: CancellationToken,
    ) -> Result<StreamSession>
    where
        O: StreamHandler + ?Sized,
    {
        let message = message.trim();
        if message.is_empty() {
            return Err(Error::validation(
                "message must not be empty",
                Some("message".to_string()),
            ));
        }
        let request = ChatRequest::new(self.context_id.clone(), message).with_mode(mode);

        self.last_error = None;
        self.turns.push(ChatTurn::user(message));
        self.turns.push(ChatTurn::open_assistant());
        let open = self.turns.len() - 1;
        let mut writer = TurnWriter {
            turn: &mut self.turns[open],
            observer,
        };
        let session = self
            .streams
            .send_with_cancel(&request, &mut writer, cancel)
            .await;

        if session.state == StreamState::Errored {
            self.last_error = session.error.clone();
        }
        Ok(session)
    }
}

/// Writes stream callbacks into the open assistant turn and forwards them.
struct TurnWriter<'a, O: ?Sized> {
    turn: &'a mut ChatTurn,
    observer: &'a mut O,
}

impl<O: StreamHandler + ?Sized> StreamHandler for TurnWriter<'_, O> {
    fn on_chunk(&mut self, chunk: &str) {
        self.turn.push_fragment(chunk);
        self.observer.on_chunk(chunk);
    }

    fn on_sources(&mut self, sources: Vec<Source>) {
        self.turn.sources = Some(sources.clone());
        self.observer.on_sources(sources);
    }

    fn on_error(&mut self, error: &Error) {
        self.turn.content = format!("Error: {error}");
        self.observer.on_error(error);
    }

    fn on_retry(&mut self) {
        self.turn.content.clear();
        self.turn.sources = None;
        self.observer.on_retry();
    }
}
