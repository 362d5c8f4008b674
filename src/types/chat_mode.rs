use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Retrieval depth requested for a chat turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// Single-pass retrieval.
    #[default]
    Standard,
    /// Multi-step retrieval; slower.
    Deep,
}

impl ChatMode {
    /// The wire value used in the `mode` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatMode::Standard => "standard",
            ChatMode::Deep => "deep",
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(ChatMode::Standard),
            "deep" => Ok(ChatMode::Deep),
            other => Err(Error::validation(
                format!("unknown chat mode '{other}' (expected standard or deep)"),
                Some("mode".to_string()),
            )),
        }
    }
}
