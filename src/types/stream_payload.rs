use serde::Deserialize;
use serde_json::Value;

use super::Source;
use crate::error::{Error, Result};

/// Data of the event that ends a chat stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event of a chat stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// The termination sentinel.
    Done,
    /// A JSON payload.
    Payload(StreamPayload),
}

impl StreamFrame {
    /// Decode the `data` of one server-sent event.
    ///
    /// Anything that is neither the sentinel nor a JSON object of the
    /// expected shape is a serialization error; the stream client treats
    /// those as malformed and skips them.
    pub fn parse(data: &str) -> Result<Self> {
        let data = data.trim();
        if data == DONE_SENTINEL {
            return Ok(StreamFrame::Done);
        }
        if !data.starts_with('{') {
            return Err(Error::serialization(
                format!("stream payload is not a JSON object: {}", preview(data)),
                None,
            ));
        }
        let payload = serde_json::from_str::<StreamPayload>(data).map_err(|e| {
            Error::serialization(
                format!("failed to parse stream payload {}: {e}", preview(data)),
                Some(Box::new(e)),
            )
        })?;
        Ok(StreamFrame::Payload(payload))
    }
}

/// The fields a chat stream payload may carry.
///
/// A payload normally carries exactly one of them; when several are present
/// they are handled in field order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamPayload {
    /// Incremental answer text.
    #[serde(default)]
    pub response: Option<String>,

    /// Citations for the answer.
    #[serde(default)]
    pub sources: Option<Vec<Source>>,

    /// Backend-reported failure.
    #[serde(default)]
    pub error: Option<Value>,
}

impl StreamPayload {
    /// Incremental text, if any non-empty text was sent.
    pub fn fragment(&self) -> Option<&str> {
        self.response.as_deref().filter(|s| !s.is_empty())
    }

    /// The failure message, if the payload reports one.
    pub fn error_message(&self) -> Option<String> {
        match self.error.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => match obj.get("message").or_else(|| obj.get("detail")) {
                Some(Value::String(s)) => Some(s.clone()),
                _ => Some(Value::Object(obj.clone()).to_string()),
            },
            other => Some(other.to_string()),
        }
    }

    /// Returns true if the payload carries none of the recognized fields.
    pub fn is_empty(&self) -> bool {
        self.fragment().is_none() && self.sources.is_none() && self.error_message().is_none()
    }
}

fn preview(data: &str) -> String {
    const MAX: usize = 64;
    match data.char_indices().nth(MAX) {
        Some((idx, _)) => format!("'{}...'", &data[..idx]),
        None => format!("'{data}'"),
    }
}
