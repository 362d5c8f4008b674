use serde::{Deserialize, Serialize};

/// The authenticated user's profile, as returned by `GET /auth/me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Backend identifier.
    pub id: String,

    /// Login email.
    pub email: String,

    /// Display name.
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,

    /// Avatar image, for OAuth accounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl User {
    /// Creates a new User with only the required fields.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            full_name: None,
            avatar_url: None,
        }
    }

    /// Sets the display name.
    pub fn with_full_name(mut self, full_name: impl Into<String>) -> Self {
        self.full_name = Some(full_name.into());
        self
    }

    /// The display name, falling back to the email.
    pub fn display_name(&self) -> &str {
        self.full_name.as_deref().unwrap_or(&self.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_profile() {
        let json = r#"{"id":"u1","email":"a@example.com","full_name":"Ada","avatar_url":null}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.display_name(), "Ada");
        assert!(user.avatar_url.is_none());
    }

    #[test]
    fn accepts_name_alias() {
        let json = r#"{"id":"u1","email":"a@example.com","name":"Ada"}"#;
        let user: User = serde_json::from_str(json).unwrap();
        assert_eq!(user.full_name.as_deref(), Some("Ada"));
    }

    #[test]
    fn display_name_falls_back_to_email() {
        let user = User::new("u1", "a@example.com");
        assert_eq!(user.display_name(), "a@example.com");
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, r#"{"id":"u1","email":"a@example.com"}"#);
    }
}
