//! The streaming chat client.
//!
//! One [`ChatStreamClient::send`] call delivers one user message over an
//! event stream and reports the answer through a [`StreamHandler`] as it
//! arrives.  A transport failure gets exactly one recovery: refresh the
//! token, reconnect from scratch.  A second failure is terminal.

use std::fmt;
use std::time::Instant;

use futures::StreamExt;
use log::{debug, warn};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::segment;
use crate::error::{Error, Result};
use crate::observability::{
    STREAM_BYTES, STREAM_DURATION, STREAM_ERRORS, STREAM_EVENTS, STREAM_MALFORMED, STREAM_OPENS,
    STREAM_RECONNECTS,
};
use crate::session::SessionManager;
use crate::sse::process_sse;
use crate::transport::{ByteStream, endpoint};
use crate::types::{ChatMode, Source, StreamFrame};

const REDACTED: &str = "REDACTED";

/////////////////////////////////////////////// ChatRequest ////////////////////////////////////////

/// One user message addressed to a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// The context whose documents answer the message.
    pub context_id: String,
    /// The user's message.
    pub message: String,
    /// Retrieval depth.
    pub mode: ChatMode,
}

impl ChatRequest {
    /// A standard-mode request.
    pub fn new(context_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            context_id: context_id.into(),
            message: message.into(),
            mode: ChatMode::Standard,
        }
    }

    /// Use `mode` instead.
    pub fn with_mode(mut self, mode: ChatMode) -> Self {
        self.mode = mode;
        self
    }
}

////////////////////////////////////////////// StreamHandler ///////////////////////////////////////

/// Receives what a chat stream delivers.
///
/// Nothing is delivered after the call that ends a stream: the `[DONE]`
/// sentinel, an `on_error`, or cancellation.
pub trait StreamHandler {
    /// An incremental fragment of the answer.
    fn on_chunk(&mut self, chunk: &str);

    /// The citations backing the answer.
    fn on_sources(&mut self, sources: Vec<Source>);

    /// A terminal failure.  Called at most once per send.
    fn on_error(&mut self, error: &Error);

    /// The stream is about to reconnect; the backend restarts the answer, so
    /// anything delivered so far is superseded.
    fn on_retry(&mut self) {}
}

type ChunkFn<'a> = Box<dyn FnMut(&str) + Send + 'a>;
type SourcesFn<'a> = Box<dyn FnMut(Vec<Source>) + Send + 'a>;
type ErrorFn<'a> = Box<dyn FnMut(&Error) + Send + 'a>;

/// A [`StreamHandler`] built from closures.  Unset callbacks do nothing.
#[derive(Default)]
pub struct Callbacks<'a> {
    chunk: Option<ChunkFn<'a>>,
    sources: Option<SourcesFn<'a>>,
    error: Option<ErrorFn<'a>>,
}

impl<'a> Callbacks<'a> {
    /// No callbacks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `f` with each fragment.
    pub fn on_chunk(mut self, f: impl FnMut(&str) + Send + 'a) -> Self {
        self.chunk = Some(Box::new(f));
        self
    }

    /// Call `f` with the sources.
    pub fn on_sources(mut self, f: impl FnMut(Vec<Source>) + Send + 'a) -> Self {
        self.sources = Some(Box::new(f));
        self
    }

    /// Call `f` with a terminal error.
    pub fn on_error(mut self, f: impl FnMut(&Error) + Send + 'a) -> Self {
        self.error = Some(Box::new(f));
        self
    }
}

impl StreamHandler for Callbacks<'_> {
    fn on_chunk(&mut self, chunk: &str) {
        if let Some(f) = self.chunk.as_mut() {
            f(chunk);
        }
    }

    fn on_sources(&mut self, sources: Vec<Source>) {
        if let Some(f) = self.sources.as_mut() {
            f(sources);
        }
    }

    fn on_error(&mut self, error: &Error) {
        if let Some(f) = self.error.as_mut() {
            f(error);
        }
    }
}

/////////////////////////////////////////////// StreamSession //////////////////////////////////////

/// Where a send is in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamState {
    /// Not started.
    #[default]
    Idle,
    /// Opening a connection.
    Connecting,
    /// Receiving events.
    Open,
    /// Ended with the `[DONE]` sentinel.
    Done,
    /// Ended with a terminal error.
    Errored,
    /// Cancelled by the caller.
    Abandoned,
}

impl StreamState {
    /// Returns true for states nothing follows.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Done | StreamState::Errored | StreamState::Abandoned
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StreamState::Idle => "idle",
            StreamState::Connecting => "connecting",
            StreamState::Open => "open",
            StreamState::Done => "done",
            StreamState::Errored => "errored",
            StreamState::Abandoned => "abandoned",
        })
    }
}

/// The record of one send.
#[derive(Debug, Clone)]
pub struct StreamSession {
    /// The last stream URL, with the token redacted.
    pub url: Option<Url>,
    /// Whether the one reconnect was spent.
    pub retry_used: bool,
    /// Event-stream bytes consumed across all connections.
    pub bytes_received: u64,
    /// Connections opened.
    pub attempts: u32,
    /// Final state.
    pub state: StreamState,
    /// The terminal error, if the send ended in [`StreamState::Errored`].
    pub error: Option<Error>,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            url: None,
            retry_used: false,
            bytes_received: 0,
            attempts: 0,
            state: StreamState::Idle,
            error: None,
        }
    }

    /// `Ok` if the stream completed, the terminal error otherwise.
    pub fn into_result(self) -> Result<()> {
        match (self.state, self.error) {
            (StreamState::Done, _) => Ok(()),
            (_, Some(err)) => Err(err),
            (state, None) => Err(Error::streaming(
                format!("chat stream ended in state {state}"),
                None,
            )),
        }
    }
}

/// How one connection ended.
enum Connection {
    Done,
    Failed(Error),
    Dropped(Error),
}

///////////////////////////////////////////// ChatStreamClient /////////////////////////////////////

/// Sends chat messages over an event stream.
#[derive(Clone)]
pub struct ChatStreamClient {
    session: SessionManager,
}

impl ChatStreamClient {
    /// A client reading tokens from `session`.
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// The session tokens are read from.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Deliver `request` and stream the answer into `handler`.
    ///
    /// Returns once the stream reaches a terminal state.  The caller must not
    /// start another send for the same conversation before that.
    pub async fn send<H>(&self, request: &ChatRequest, handler: &mut H) -> StreamSession
    where
        H: StreamHandler + ?Sized,
    {
        self.send_with_cancel(request, handler, CancellationToken::new())
            .await
    }

    /// Like [`ChatStreamClient::send`], but cancelling `cancel` closes the
    /// connection and ends the send in [`StreamState::Abandoned`] without
    /// further callbacks.
    pub async fn send_with_cancel<H>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
        cancel: CancellationToken,
    ) -> StreamSession
    where
        H: StreamHandler + ?Sized,
    {
        let start = Instant::now();
        let mut record = StreamSession::new();
        let outcome = {
            let run = self.run(request, handler, &mut record);
            tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = run => Some(outcome),
            }
        };
        match outcome {
            None => {
                debug!("chat stream abandoned");
                record.state = StreamState::Abandoned;
            }
            Some(Ok(())) => {
                debug!("chat stream done after {} attempt(s)", record.attempts);
                record.state = StreamState::Done;
            }
            Some(Err(err)) => {
                STREAM_ERRORS.click();
                debug!("chat stream failed: {err}");
                record.state = StreamState::Errored;
                record.error = Some(err);
            }
        }
        STREAM_DURATION.add(start.elapsed().as_secs_f64());
        record
    }

    /// Drive connections until a terminal outcome.  Every `Err` returned has
    /// already been passed to `on_error`.
    async fn run<H>(
        &self,
        request: &ChatRequest,
        handler: &mut H,
        record: &mut StreamSession,
    ) -> Result<()>
    where
        H: StreamHandler + ?Sized,
    {
        if let Err(err) = validate(request) {
            handler.on_error(&err);
            return Err(err);
        }

        let mut token = self.session.fresh_access_token().await;
        loop {
            record.attempts += 1;
            record.state = StreamState::Connecting;
            let url = match stream_url(self.session.transport().base_url(), request, token.as_deref()) {
                Ok(url) => url,
                Err(err) => {
                    handler.on_error(&err);
                    return Err(err);
                }
            };
            let redacted = redact(&url);
            debug!("opening chat stream {redacted}");
            record.url = Some(redacted);
            STREAM_OPENS.click();

            // The connection is gone by the time `failure` is bound, so a
            // refresh below can never overlap with more errors from it.
            let failure = match self.session.transport().open_stream(&url).await {
                Ok(bytes) => {
                    record.state = StreamState::Open;
                    match consume(bytes, handler, record).await {
                        Connection::Done => return Ok(()),
                        Connection::Failed(err) => return Err(err),
                        Connection::Dropped(err) => err,
                    }
                }
                Err(err) => err,
            };

            if record.retry_used {
                if failure.is_authentication() {
                    match token.as_deref() {
                        Some(rejected) => self.session.expire_token(rejected),
                        None => self.session.expire(),
                    };
                }
                handler.on_error(&failure);
                return Err(failure);
            }

            record.retry_used = true;
            debug!("chat stream failed ({failure}); refreshing token before one reconnect");
            match self.session.refresh().await {
                Some(fresh) => {
                    STREAM_RECONNECTS.click();
                    token = Some(fresh);
                    handler.on_retry();
                }
                None => {
                    let err = Error::authentication(format!(
                        "session could not be refreshed after stream failure: {}",
                        failure.message()
                    ));
                    handler.on_error(&err);
                    return Err(err);
                }
            }
        }
    }
}

/// Read one connection until it ends.
async fn consume<H>(bytes: ByteStream, handler: &mut H, record: &mut StreamSession) -> Connection
where
    H: StreamHandler + ?Sized,
{
    let mut events = Box::pin(process_sse(bytes));
    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(err) if err.is_malformed() => {
                STREAM_MALFORMED.click();
                warn!("skipping undecodable stream event: {err}");
                continue;
            }
            Err(err) => return Connection::Dropped(err),
        };
        record.bytes_received += event.raw_len as u64;
        STREAM_BYTES.count(event.raw_len as u64);
        STREAM_EVENTS.click();

        let payload = match StreamFrame::parse(&event.data) {
            Ok(StreamFrame::Done) => return Connection::Done,
            Ok(StreamFrame::Payload(payload)) => payload,
            Err(err) => {
                STREAM_MALFORMED.click();
                warn!("skipping malformed stream payload: {err}");
                continue;
            }
        };
        if payload.is_empty() {
            debug!("ignoring stream payload with no recognized fields");
            continue;
        }
        let error = payload.error_message();
        if let Some(fragment) = payload.fragment() {
            handler.on_chunk(fragment);
        }
        if let Some(sources) = payload.sources {
            handler.on_sources(sources);
        }
        if let Some(message) = error {
            let err = Error::application(message);
            handler.on_error(&err);
            return Connection::Failed(err);
        }
    }
    Connection::Dropped(Error::streaming(
        "chat stream closed before completion",
        None,
    ))
}

fn validate(request: &ChatRequest) -> Result<()> {
    segment(&request.context_id)?;
    if request.message.trim().is_empty() {
        return Err(Error::validation(
            "message must not be empty",
            Some("message".to_string()),
        ));
    }
    Ok(())
}

/// `GET {api}/chat/{context}?message=..&mode=..&token=..`
///
/// The token travels as a query parameter because event streams cannot
/// carry an `Authorization` header.
pub fn stream_url(base: &Url, request: &ChatRequest, token: Option<&str>) -> Result<Url> {
    let mut url = endpoint(base, &format!("chat/{}", segment(&request.context_id)?))?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("message", &request.message);
        query.append_pair("mode", request.mode.as_str());
        if let Some(token) = token {
            query.append_pair("token", token);
        }
    }
    Ok(url)
}

/// `url` with any `token` parameter replaced, for logs and records.
pub fn redact(url: &Url) -> Url {
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if key == "token" {
                REDACTED.to_string()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect();
    let mut redacted = url.clone();
    if !pairs.is_empty() {
        redacted.query_pairs_mut().clear().extend_pairs(pairs);
    }
    redacted
}
