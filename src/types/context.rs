use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A named collection of uploaded documents that scopes one chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    /// Backend identifier.
    pub id: String,

    /// User-chosen name.
    pub name: String,

    /// Creation time.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Owner.
    #[serde(default)]
    pub user_id: String,

    /// Number of documents attached to the context.
    #[serde(default)]
    pub document_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_listing_entry() {
        let json = r#"{"id":"c1","name":"Papers","created_at":"2024-05-01T09:00:00Z","user_id":"u1","document_count":3}"#;
        let context: Context = serde_json::from_str(json).unwrap();
        assert_eq!(context.name, "Papers");
        assert_eq!(context.document_count, 3);
    }
}
