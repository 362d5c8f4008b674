use std::fmt;

use serde::{Deserialize, Serialize};

use super::User;

/// Body of `POST /auth/login`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LoginRequest {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
}

/// Response of `POST /auth/login`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    /// Short-lived credential.
    pub access_token: String,

    /// Long-lived credential, when the backend returns it in the body.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Token scheme, normally `bearer`.
    #[serde(default)]
    pub token_type: Option<String>,

    /// Profile of the user that signed in.
    #[serde(default)]
    pub user: Option<User>,
}

/// Body of `POST /auth/signup`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SignupRequest {
    /// Login email.
    pub email: String,
    /// Password.
    pub password: String,
    /// Display name.
    pub full_name: String,
}

/// Body of `POST /auth/refresh` and `POST /auth/logout`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RefreshRequest {
    /// The refresh token being exchanged or revoked.
    pub refresh_token: String,
}

/// Response of `POST /auth/refresh`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RefreshResponse {
    /// The new access token.
    pub access_token: String,

    /// A rotated refresh token, if the backend rotates them.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Third-party identity providers the backend can sign users in with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    /// Google accounts.
    Google,
    /// GitHub accounts.
    GitHub,
}

impl OAuthProvider {
    /// Path segment used by the backend's OAuth routes.
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::GitHub => "github",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_response_without_refresh_token() {
        let json = r#"{"access_token":"a","token_type":"bearer","user":{"id":"u1","email":"a@example.com"}}"#;
        let response: LoginResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "a");
        assert!(response.refresh_token.is_none());
        assert_eq!(response.user.unwrap().id, "u1");
    }

    #[test]
    fn refresh_response_with_rotation() {
        let json = r#"{"access_token":"a2","refresh_token":"r2"}"#;
        let response: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.refresh_token.as_deref(), Some("r2"));
    }
}
