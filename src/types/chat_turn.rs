use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::Source;
use crate::utils::time::now;

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The person asking.
    User,
    /// The model answering.
    #[default]
    Assistant,
}

/// One message in a conversation.
///
/// An assistant turn is mutable while its stream is open: content grows one
/// fragment at a time and sources arrive once, usually right before the end.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    /// Author of the turn.
    #[serde(default)]
    pub role: ChatRole,

    /// Text of the turn.
    #[serde(default)]
    pub content: String,

    /// Citations backing an assistant answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,

    /// When the turn was created.
    #[serde(default = "now", with = "crate::utils::time")]
    pub timestamp: OffsetDateTime,
}

impl ChatTurn {
    /// A user turn stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            sources: None,
            timestamp: now(),
        }
    }

    /// An empty assistant turn ready to receive streamed fragments.
    pub fn open_assistant() -> Self {
        Self {
            role: ChatRole::Assistant,
            content: String::new(),
            sources: None,
            timestamp: now(),
        }
    }

    /// Returns true if this turn was authored by the assistant.
    pub fn is_assistant(&self) -> bool {
        self.role == ChatRole::Assistant
    }

    /// Append a streamed fragment.
    pub fn push_fragment(&mut self, fragment: &str) {
        self.content.push_str(fragment);
    }
}
