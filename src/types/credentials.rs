use std::fmt;

use time::{Duration, OffsetDateTime};

use crate::utils::jwt;

/// The access/refresh token pair owned by the session manager.
///
/// `Debug` never prints the tokens themselves.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialPair {
    /// Short-lived credential attached to every backend call.
    pub access_token: String,

    /// Long-lived credential exchanged for a new pair.
    pub refresh_token: Option<String>,

    /// When the access token lapses, if it carries an `exp` claim.
    pub expires_at: Option<OffsetDateTime>,
}

impl CredentialPair {
    /// Build a pair, reading the expiry from the access token when possible.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        let access_token = access_token.into();
        let expires_at = jwt::expires_at(&access_token);
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// True when the access token is known to expire within `buffer`.
    ///
    /// Opaque tokens with no expiry are assumed valid; the backend will say
    /// otherwise with a 401.
    pub fn expires_within(&self, now: OffsetDateTime, buffer: Duration) -> bool {
        self.expires_at.is_some_and(|exp| now + buffer >= exp)
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expiry_comes_from_jwt() {
        let token = jwt::encode_for_test(&json!({"exp": 2_000}));
        let pair = CredentialPair::new(token, Some("r".to_string()));
        let now = OffsetDateTime::from_unix_timestamp(1_000).unwrap();
        assert!(!pair.expires_within(now, Duration::seconds(60)));
        assert!(pair.expires_within(now, Duration::seconds(1_000)));
    }

    #[test]
    fn opaque_token_never_expires_locally() {
        let pair = CredentialPair::new("opaque", None);
        assert!(pair.expires_at.is_none());
        assert!(!pair.expires_within(OffsetDateTime::now_utc(), Duration::hours(1)));
    }

    #[test]
    fn debug_redacts_tokens() {
        let pair = CredentialPair::new("secret-access", Some("secret-refresh".to_string()));
        let rendered = format!("{pair:?}");
        assert!(!rendered.contains("secret"));
    }
}
