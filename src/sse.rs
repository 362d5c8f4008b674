//! Server-Sent Events (SSE) framing.
//!
//! This module turns the raw byte stream of an event-stream response into
//! [`SseEvent`]s.  It knows nothing about what the `data` means; decoding
//! chat payloads is the stream client's job.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::error::{Error, Result};

/// One dispatched server-sent event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if the server named the event.
    pub event: Option<String>,
    /// The `data:` lines, joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// Bytes consumed from the wire for this event, including skipped
    /// comment-only frames before it.
    pub raw_len: usize,
}

/// Process a stream of bytes into a stream of server-sent events.
///
/// Frames are delimited by a blank line.  `\r\n` and lone `\r` line endings
/// are read as `\n`,
/// multi-line `data:` fields are joined, comment lines and frames without
/// data are skipped, and a frame is decoded as UTF-8 only once it is
/// complete so multi-byte characters may be split across chunks.
///
/// Errors from the byte stream are passed through unchanged; a frame that
/// is not valid UTF-8 yields an encoding error and the stream continues.
pub fn process_sse<S>(byte_stream: S) -> impl Stream<Item = Result<SseEvent>> + Send
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send + 'static,
{
    let buffer = LineBuffer::default();
    let skipped: usize = 0;

    stream::unfold(
        (byte_stream, buffer, skipped, false),
        move |(mut stream, mut buffer, mut skipped, finished)| async move {
            if finished {
                return None;
            }
            loop {
                // First check if we have a complete frame in the buffer
                if let Some(frame) = take_frame(&mut buffer.bytes) {
                    let raw_len = frame.len() + 2 + skipped;
                    match parse_frame(&frame) {
                        Ok(Some(mut event)) => {
                            event.raw_len = raw_len;
                            return Some((Ok(event), (stream, buffer, 0, false)));
                        }
                        Ok(None) => {
                            skipped = raw_len;
                            continue;
                        }
                        Err(e) => return Some((Err(e), (stream, buffer, 0, false))),
                    }
                }

                // Read more data
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        buffer.extend(&bytes);
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, skipped, false)));
                    }
                    None => {
                        // End of stream; dispatch a trailing unterminated frame.
                        let rest = std::mem::take(&mut buffer.bytes);
                        if rest.iter().all(u8::is_ascii_whitespace) {
                            return None;
                        }
                        let raw_len = rest.len() + skipped;
                        return match parse_frame(&rest) {
                            Ok(Some(mut event)) => {
                                event.raw_len = raw_len;
                                Some((Ok(event), (stream, buffer, 0, true)))
                            }
                            Ok(None) => None,
                            Err(e) => Some((Err(e), (stream, buffer, 0, true))),
                        };
                    }
                }
            }
        },
    )
}

/// Bytes not yet framed, with every line ending normalized to `\n`.
#[derive(Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    /// The last byte seen was a `\r`; a `\n` right after it is part of the
    /// same line ending, even across chunks.
    pending_cr: bool,
}

impl LineBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        for &b in chunk {
            match b {
                b'\r' => {
                    self.bytes.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.bytes.push(b);
                    self.pending_cr = false;
                }
            }
        }
    }
}

/// Remove and return the first complete frame, without its terminating blank line.
fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = buffer.windows(2).position(|w| w == b"\n\n")?;
    let mut frame: Vec<u8> = buffer.drain(..end + 2).collect();
    frame.truncate(end);
    Some(frame)
}

/// Parse one frame; `Ok(None)` for frames that carry no data.
fn parse_frame(frame: &[u8]) -> Result<Option<SseEvent>> {
    let text = std::str::from_utf8(frame).map_err(|e| {
        Error::encoding(format!("Invalid UTF-8 in stream: {e}"), Some(Box::new(e)))
    })?;

    let mut event = SseEvent::default();
    let mut data_lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => data_lines.push(value),
            "event" => event.event = Some(value.to_string()),
            "id" => event.id = Some(value.to_string()),
            _ => {}
        }
    }

    if data_lines.is_empty() {
        return Ok(None);
    }
    event.data = data_lines.join("\n");
    Ok(Some(event))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes>> + Unpin + Send + use<> {
        let items: Vec<Result<Bytes>> = parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        stream::iter(items)
    }

    async fn collect(parts: &[&'static [u8]]) -> Vec<Result<SseEvent>> {
        process_sse(chunks(parts)).collect().await
    }

    #[tokio::test]
    async fn parse_single_event() {
        let events = collect(&[b"data: {\"response\":\"Hel\"}\n\n"]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, r#"{"response":"Hel"}"#);
        assert!(event.event.is_none());
        assert_eq!(event.raw_len, 26);
    }

    #[tokio::test]
    async fn parse_multiple_events() {
        let events = collect(&[b"data: a\n\ndata: b\n\ndata: [DONE]\n\n"]).await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["a", "b", "[DONE]"]);
    }

    #[tokio::test]
    async fn handle_split_event() {
        let events = collect(&[b"da", b"ta: hel", b"lo\n", b"\ndata: x\n\n"]).await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["hello", "x"]);
    }

    #[tokio::test]
    async fn handle_crlf_and_fields() {
        let events = collect(&[b"event: message\r\nid: 7\r\ndata: hi\r\n\r\n"]).await;
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.event.as_deref(), Some("message"));
        assert_eq!(event.id.as_deref(), Some("7"));
        assert_eq!(event.data, "hi");
    }

    #[tokio::test]
    async fn lone_cr_ends_lines() {
        let events = collect(&[b"data: a\r\rdata: b\r", b"\n\r\n"]).await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn multi_line_data_is_joined() {
        let events = collect(&[b"data: line one\ndata: line two\n\n"]).await;
        assert_eq!(events[0].as_ref().unwrap().data, "line one\nline two");
    }

    #[tokio::test]
    async fn comments_and_empty_frames_are_skipped() {
        let events = collect(&[b": keep-alive\n\nretry: 100\n\ndata: x\n\n"]).await;
        assert_eq!(events.len(), 1);
        let event = events[0].as_ref().unwrap();
        assert_eq!(event.data, "x");
        // The skipped frames still count toward bytes received.
        assert_eq!(event.raw_len, 14 + 12 + 9);
    }

    #[tokio::test]
    async fn utf8_split_across_chunks() {
        let events = collect(&[b"data: caf\xc3", b"\xa9\n\n"]).await;
        assert_eq!(events[0].as_ref().unwrap().data, "café");
    }

    #[tokio::test]
    async fn invalid_utf8_frame_is_an_encoding_error() {
        let events = collect(&[b"data: \xff\xfe\n\ndata: ok\n\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].as_ref().unwrap_err().is_malformed());
        assert_eq!(events[1].as_ref().unwrap().data, "ok");
    }

    #[tokio::test]
    async fn trailing_frame_without_blank_line() {
        let events = collect(&[b"data: a\n\ndata: [DONE]\n"]).await;
        let data: Vec<String> = events.into_iter().map(|e| e.unwrap().data).collect();
        assert_eq!(data, vec!["a", "[DONE]"]);
    }

    #[tokio::test]
    async fn transport_errors_pass_through() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(Error::streaming("connection reset", None)),
        ];
        let events: Vec<Result<SseEvent>> = process_sse(stream::iter(items)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "a");
        assert!(matches!(events[1], Err(Error::Streaming { .. })));
    }
}
