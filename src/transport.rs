//! The network seam between the client core and the backend.
//!
//! [`Transport`] is everything the session manager, request interceptor and
//! streaming chat client need from the network: one request/response call and
//! one way to open an event stream.  [`HttpTransport`] implements it with
//! `reqwest`.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use futures::stream::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::types::UploadFile;

/// Raw bytes of an open event stream.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// HTTP methods the backend API uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// Body of an [`ApiRequest`].
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// No body.
    Empty,
    /// A JSON document.
    Json(Value),
    /// A multipart form; files are held in memory so the request can be replayed.
    Multipart {
        /// Plain text fields.
        fields: Vec<(String, String)>,
        /// File parts, keyed by form field name.
        files: Vec<(String, UploadFile)>,
    },
}

/// A fully owned, replayable API call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API root, e.g. `contexts/abc`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
    /// Whether the interceptor attaches the access token.
    pub authenticated: bool,
    retried: bool,
}

impl ApiRequest {
    /// A request with no body.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            authenticated: true,
            retried: false,
        }
    }

    /// A GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// A POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// A DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Attach a JSON body.
    pub fn with_json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        self.body = RequestBody::Json(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Append a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append a text field, switching the body to a multipart form.
    pub fn with_form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.multipart_mut().0.push((name.into(), value.into()));
        self
    }

    /// Append a file part, switching the body to a multipart form.
    pub fn with_file(mut self, name: impl Into<String>, file: UploadFile) -> Self {
        self.multipart_mut().1.push((name.into(), file));
        self
    }

    /// Send without an access token (login, signup, refresh, logout).
    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }

    /// Returns true once the interceptor has replayed this request.
    pub fn is_retried(&self) -> bool {
        self.retried
    }

    /// The retry flag is sticky: once set it is never cleared.
    pub(crate) fn mark_retried(&mut self) {
        self.retried = true;
    }

    fn multipart_mut(&mut self) -> (&mut Vec<(String, String)>, &mut Vec<(String, UploadFile)>) {
        if !matches!(self.body, RequestBody::Multipart { .. }) {
            self.body = RequestBody::Multipart {
                fields: Vec::new(),
                files: Vec::new(),
            };
        }
        match &mut self.body {
            RequestBody::Multipart { fields, files } => (fields, files),
            _ => unreachable!("body was just set to multipart"),
        }
    }
}

/// A response whose body has been read in full.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// `x-request-id` header, if present.
    pub request_id: Option<String>,
    /// `retry-after` header in seconds, if present.
    pub retry_after: Option<u64>,
    /// Response body.
    pub body: Bytes,
}

impl ApiResponse {
    /// A response with the given status and body.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            request_id: None,
            retry_after: None,
            body: body.into(),
        }
    }

    /// A response carrying a JSON body.
    pub fn json_body(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 401.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::serialization(format!("Failed to parse response: {e}"), Some(Box::new(e)))
        })
    }

    /// Pass successful responses through and map failures to an [`Error`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.into_error())
        }
    }

    /// Map a failed response onto the error taxonomy.
    pub fn into_error(self) -> Error {
        let message = error_message(&self.body)
            .unwrap_or_else(|| format!("request failed with status {}", self.status));
        match self.status {
            400 | 422 => Error::bad_request(message),
            401 => Error::authentication(message),
            403 => Error::permission(message),
            404 => Error::not_found(message),
            408 => Error::timeout(message, None),
            429 => Error::rate_limit(message, self.retry_after),
            500 => Error::internal_server(message, self.request_id),
            502..=504 => Error::service_unavailable(message, self.retry_after),
            status => Error::api(status, message, self.request_id),
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"detail": "..."}`, validation arrays
/// `{"detail": [{"msg": "..."}]}`, `{"error": {"message": "..."}}`,
/// `{"error": "..."}` and `{"message": "..."}`; falls back to the raw text.
fn error_message(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Some(text.to_string());
    };
    let from_detail = match value.get("detail") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str))
                .collect();
            (!msgs.is_empty()).then(|| msgs.join("; "))
        }
        _ => None,
    };
    from_detail
        .or_else(|| match value.get("error") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(err) => err.get("message").and_then(Value::as_str).map(String::from),
            None => None,
        })
        .or_else(|| value.get("message").and_then(Value::as_str).map(String::from))
        .or_else(|| Some(text.to_string()))
}

/// Resolve an API path against the API root.
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// What the client core needs from the network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// The API root every path is resolved against.
    fn base_url(&self) -> &Url;

    /// Perform one request/response call.
    ///
    /// Non-success statuses are returned as responses, not errors; only
    /// failures to get a response at all are errors.
    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse>;

    /// Open an event stream.
    ///
    /// A non-success status on open is an error; the returned stream yields
    /// the raw body bytes.
    async fn open_stream(&self, url: &Url) -> Result<ByteStream>;
}

/// [`Transport`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    stream_client: ReqwestClient,
    base_url: Url,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from resolved settings.
    ///
    /// Event streams get their own client with only a connect timeout, since
    /// a whole-request timeout would cut long answers off mid-stream.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        let stream_client = ReqwestClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        Ok(Self {
            client,
            stream_client,
            base_url: config.api_url.clone(),
            timeout: config.timeout,
        })
    }

    fn default_headers(bearer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = bearer {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                Error::validation(
                    format!("access token is not a valid header value: {e}"),
                    Some("access_token".to_string()),
                )
            })?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn map_send_error(&self, e: reqwest::Error) -> Error {
        if e.is_timeout() {
            Error::timeout(
                format!("Request timed out: {e}"),
                Some(self.timeout.as_secs_f64()),
            )
        } else if e.is_connect() {
            Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
        } else {
            Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    async fn read_response(&self, response: Response) -> Result<ApiResponse> {
        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|val| val.to_str().ok())
            .map(String::from);
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<u64>().ok());
        let body = response.bytes().await.map_err(|e| self.map_send_error(e))?;
        Ok(ApiResponse {
            status,
            request_id,
            retry_after,
            body,
        })
    }

    fn multipart_form(
        fields: &[(String, String)],
        files: &[(String, UploadFile)],
    ) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in fields {
            form = form.text(name.clone(), value.clone());
        }
        for (name, file) in files {
            let part = reqwest::multipart::Part::bytes(file.bytes.clone())
                .file_name(file.filename.clone())
                .mime_str(&file.content_type)
                .map_err(|e| {
                    Error::validation(
                        format!("invalid content type '{}': {e}", file.content_type),
                        Some("content_type".to_string()),
                    )
                })?;
            form = form.part(name.clone(), part);
        }
        Ok(form)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let url = endpoint(&self.base_url, &request.path)?;
        let builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Delete => self.client.delete(url),
        };
        let mut builder = builder.headers(Self::default_headers(bearer)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart { fields, files } => {
                builder.multipart(Self::multipart_form(fields, files)?)
            }
        };
        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;
        self.read_response(response).await
    }

    async fn open_stream(&self, url: &Url) -> Result<ByteStream> {
        let response = self
            .stream_client
            .get(url.clone())
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(self.read_response(response).await?.into_error());
        }

        let stream = response.bytes_stream().map(|result| {
            result.map_err(|e| {
                Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e)))
            })
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_mapping() {
        let err = ApiResponse::json_body(401, &json!({"detail": "Not authenticated"})).into_error();
        assert!(err.is_authentication());
        assert_eq!(err.message(), "Not authenticated");

        let err = ApiResponse::json_body(404, &json!({"detail": "Context not found"})).into_error();
        assert!(err.is_not_found());

        let err = ApiResponse::new(503, "").into_error();
        assert!(matches!(err, Error::ServiceUnavailable { .. }));
        assert_eq!(err.message(), "request failed with status 503");

        let err = ApiResponse::new(418, "short and stout").into_error();
        assert_eq!(err.status_code(), Some(418));
        assert_eq!(err.message(), "short and stout");
    }

    #[test]
    fn validation_detail_arrays_are_joined() {
        let body = json!({"detail": [{"msg": "field required"}, {"msg": "value is not a valid email"}]});
        let err = ApiResponse::json_body(422, &body).into_error();
        assert!(matches!(err, Error::BadRequest { .. }));
        assert_eq!(err.message(), "field required; value is not a valid email");
    }

    #[test]
    fn nested_error_message() {
        let body = json!({"error": {"message": "quota exceeded"}});
        let err = ApiResponse::json_body(429, &body).into_error();
        assert_eq!(err.message(), "quota exceeded");
    }

    #[test]
    fn success_passes_through() {
        let response = ApiResponse::json_body(200, &json!({"ok": true}));
        let response = response.error_for_status().unwrap();
        let value: Value = response.json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn endpoints_join_under_api_root() {
        let base = Url::parse("http://localhost:8000/api/").unwrap();
        assert_eq!(
            endpoint(&base, "/contexts/").unwrap().as_str(),
            "http://localhost:8000/api/contexts/"
        );
        assert_eq!(
            endpoint(&base, "auth/me").unwrap().as_str(),
            "http://localhost:8000/api/auth/me"
        );
    }

    #[test]
    fn requests_build_multipart_bodies() {
        let request = ApiRequest::post("contexts/")
            .with_form_field("name", "Papers")
            .with_file("files", UploadFile::pdf("a.pdf", b"%PDF".to_vec()));
        match &request.body {
            RequestBody::Multipart { fields, files } => {
                assert_eq!(fields, &vec![("name".to_string(), "Papers".to_string())]);
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].1.filename, "a.pdf");
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert!(request.authenticated);
        assert!(!request.is_retried());
    }

    #[test]
    fn retry_flag_is_sticky() {
        let mut request = ApiRequest::get("contexts/").unauthenticated();
        assert!(!request.authenticated);
        request.mark_retried();
        request.mark_retried();
        assert!(request.is_retried());
    }

    #[test]
    fn http_transport_keeps_api_root() {
        let config = ClientConfig::new()
            .with_api_url("https://chat.example.com/api")
            .unwrap();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.base_url().as_str(), "https://chat.example.com/api/");
        assert_eq!(transport.timeout, config.timeout);
    }
}
