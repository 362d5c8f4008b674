use serde::{Deserialize, Serialize};

/// A citation attached to an assistant answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Source {
    /// Name of the uploaded document the passage came from.
    #[serde(default)]
    pub filename: String,

    /// Short excerpt of the retrieved passage.
    #[serde(default)]
    pub content_preview: String,

    /// Link to download the original document.
    #[serde(default)]
    pub download_url: String,
}

impl Source {
    /// Creates a new Source.
    pub fn new(
        filename: impl Into<String>,
        content_preview: impl Into<String>,
        download_url: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_preview: content_preview.into(),
            download_url: download_url.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_default_to_empty() {
        let source: Source = serde_json::from_str(r#"{"filename":"a.pdf"}"#).unwrap();
        assert_eq!(source.filename, "a.pdf");
        assert!(source.content_preview.is_empty());
        assert!(source.download_url.is_empty());
    }
}
