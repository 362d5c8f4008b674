//! Token attachment and refresh-and-replay for ordinary API calls.

use std::time::Instant;

use log::debug;

use crate::error::Result;
use crate::observability::{
    CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUEST_REPLAYS, CLIENT_REQUESTS,
};
use crate::session::SessionManager;
use crate::transport::{ApiRequest, ApiResponse};

/// Sends [`ApiRequest`]s with the session's access token.
///
/// A `401` on a request that has not been replayed yet triggers one
/// [`SessionManager::refresh`] and one replay.  The replay flag is sticky,
/// so no request is ever sent more than twice.
#[derive(Clone)]
pub struct Interceptor {
    session: SessionManager,
}

impl Interceptor {
    /// Wrap `session`.
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    /// The session tokens are read from.
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Send `request`, returning the successful response or the mapped error.
    pub async fn execute(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = self.execute_with_replay(&mut request).await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
        if let Err(err) = &result {
            CLIENT_REQUEST_ERRORS.click();
            debug!("{} {} failed: {err}", request.method, request.path);
        }
        result
    }

    async fn execute_with_replay(&self, request: &mut ApiRequest) -> Result<ApiResponse> {
        let used = if request.authenticated {
            self.session.access_token()
        } else {
            None
        };
        let response = self
            .session
            .transport()
            .execute(request, used.as_deref())
            .await?;
        if !response.is_unauthorized() || !request.authenticated || request.is_retried() {
            return response.error_for_status();
        }

        request.mark_retried();
        let current = self.session.access_token();
        let token = if current.is_some() && current != used {
            // Someone else refreshed while this request was in flight.
            debug!("access token changed during request; replaying without refresh");
            current
        } else {
            self.session.refresh().await
        };
        let Some(token) = token else {
            return Err(response.into_error());
        };

        CLIENT_REQUEST_REPLAYS.click();
        debug!("replaying {} {} with refreshed token", request.method, request.path);
        let replayed = self.session.transport().execute(request, Some(&token)).await?;
        if replayed.is_unauthorized() {
            debug!("replay of {} {} was also rejected", request.method, request.path);
            self.session.expire_token(&token);
        }
        replayed.error_for_status()
    }
}
