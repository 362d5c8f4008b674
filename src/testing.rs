//! An in-memory [`Transport`] that answers from a script.
//!
//! Used by this crate's tests and usable by downstream code that wants to
//! exercise session and streaming behavior without a backend.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use url::Url;

use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse, ByteStream, Method, Transport};

type Handler = Arc<dyn Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse> + Send + Sync>;

struct Route {
    method: Method,
    path: String,
    delay: Option<Duration>,
    handler: Handler,
}

/// One call observed by a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API root.
    pub path: String,
    /// The bearer token the call carried.
    pub bearer: Option<String>,
    /// The full request.
    pub request: ApiRequest,
}

/// How the next `open_stream` call behaves.
pub enum ScriptedStream {
    /// Fail to open with the given error.
    Refuse(Error),
    /// Open and yield these items, then end.
    Open(Vec<Result<Bytes>>),
    /// Open, yield these items, then stay silent forever.
    Hang(Vec<Result<Bytes>>),
}

impl ScriptedStream {
    /// A stream that sends each string as one `data:` event.
    pub fn events(data: &[&str]) -> Self {
        ScriptedStream::Open(data.iter().map(|d| Ok(sse_frame(d))).collect())
    }

    /// Append a transport failure after the scripted items.
    pub fn then_fail(self, error: Error) -> Self {
        match self {
            ScriptedStream::Open(mut items) => {
                items.push(Err(error));
                ScriptedStream::Open(items)
            }
            ScriptedStream::Hang(mut items) => {
                items.push(Err(error));
                ScriptedStream::Open(items)
            }
            refused => refused,
        }
    }

    /// Keep the connection open after the scripted items.
    pub fn then_hang(self) -> Self {
        match self {
            ScriptedStream::Open(items) | ScriptedStream::Hang(items) => {
                ScriptedStream::Hang(items)
            }
            refused => refused,
        }
    }
}

/// Frame `data` as one server-sent event.
pub fn sse_frame(data: &str) -> Bytes {
    Bytes::from(format!("data: {data}\n\n"))
}

/// A [`Transport`] driven by registered handlers and queued streams.
pub struct ScriptedTransport {
    base_url: Url,
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<RecordedCall>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    stream_urls: Mutex<Vec<Url>>,
}

impl ScriptedTransport {
    /// A transport rooted at `http://backend.test/api/` with nothing scripted.
    pub fn new() -> Self {
        Self {
            base_url: Url::parse("http://backend.test/api/").expect("static URL is valid"),
            routes: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            streams: Mutex::new(VecDeque::new()),
            stream_urls: Mutex::new(Vec::new()),
        }
    }

    /// Answer `method path` with `handler`.  Later registrations win.
    pub fn on<F>(&self, method: Method, path: &str, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        self.route(method, path, None, handler);
    }

    /// Like [`ScriptedTransport::on`], but the answer takes `delay` to arrive.
    pub fn on_delayed<F>(&self, method: Method, path: &str, delay: Duration, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        self.route(method, path, Some(delay), handler);
    }

    fn route<F>(&self, method: Method, path: &str, delay: Option<Duration>, handler: F)
    where
        F: Fn(&ApiRequest, Option<&str>) -> Result<ApiResponse> + Send + Sync + 'static,
    {
        lock(&self.routes).push(Route {
            method,
            path: path.trim_start_matches('/').to_string(),
            delay,
            handler: Arc::new(handler),
        });
    }

    /// Queue the behavior of the next `open_stream` call.
    pub fn push_stream(&self, stream: ScriptedStream) {
        lock(&self.streams).push_back(stream);
    }

    /// Every request/response call seen so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// How many times `method path` was called.
    pub fn count(&self, method: Method, path: &str) -> usize {
        let path = path.trim_start_matches('/');
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    /// Every URL passed to `open_stream`, in order.
    pub fn stream_urls(&self) -> Vec<Url> {
        lock(&self.stream_urls).clone()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for ScriptedTransport {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let path = request.path.trim_start_matches('/').to_string();
        lock(&self.calls).push(RecordedCall {
            method: request.method,
            path: path.clone(),
            bearer: bearer.map(String::from),
            request: request.clone(),
        });
        let route = lock(&self.routes)
            .iter()
            .rev()
            .find(|r| r.method == request.method && r.path == path)
            .map(|r| (r.delay, Arc::clone(&r.handler)));
        let Some((delay, handler)) = route else {
            return Ok(ApiResponse::new(404, format!("no route for {} {path}", request.method)));
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        handler(request, bearer)
    }

    async fn open_stream(&self, url: &Url) -> Result<ByteStream> {
        lock(&self.stream_urls).push(url.clone());
        let next = lock(&self.streams).pop_front();
        match next {
            None => Err(Error::connection("no scripted stream", None)),
            Some(ScriptedStream::Refuse(err)) => Err(err),
            Some(ScriptedStream::Open(items)) => Ok(Box::pin(stream::iter(items))),
            Some(ScriptedStream::Hang(items)) => {
                Ok(Box::pin(stream::iter(items).chain(stream::pending())))
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
