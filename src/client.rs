use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::interceptor::Interceptor;
use crate::session::SessionManager;
use crate::store::{CredentialStore, FileStore, MemoryStore};
use crate::transport::{ApiRequest, HttpTransport, Transport};
use crate::types::{ChatTurn, Context, Document, DocumentUploadResponse, UploadFile, User};

/// Client for the document-chat backend's request/response API.
///
/// Every call goes through an [`Interceptor`], so tokens are attached and
/// one refresh-and-replay happens on a `401`.
///
/// # Examples
///
/// ```
/// # use std::sync::Arc;
/// # use docchat::{ApiClient, SessionManager};
/// # use docchat::store::MemoryStore;
/// # use docchat::testing::ScriptedTransport;
/// # use docchat::transport::{ApiResponse, Method};
/// # tokio_test::block_on(async {
/// let transport = Arc::new(ScriptedTransport::new());
/// transport.on(Method::Get, "contexts/", |_, _| Ok(ApiResponse::new(200, "[]")));
/// let session = SessionManager::new(transport, Arc::new(MemoryStore::new()));
///
/// let client = ApiClient::new(session);
/// assert!(client.list_contexts().await.unwrap().is_empty());
/// # });
/// ```
#[derive(Clone)]
pub struct ApiClient {
    interceptor: Interceptor,
}

impl ApiClient {
    /// A client sharing `session` with whatever else holds it.
    pub fn new(session: SessionManager) -> Self {
        Self {
            interceptor: Interceptor::new(session),
        }
    }

    /// Create a client from resolved settings.
    ///
    /// Sessions persist to `config.store_path` when set and are kept in
    /// memory otherwise.  The session is not restored; call
    /// [`SessionManager::init`] for that.
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config)?);
        let store: Arc<dyn CredentialStore> = match &config.store_path {
            Some(path) => Arc::new(FileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(SessionManager::new(transport, store)))
    }

    /// The session this client authenticates with.
    pub fn session(&self) -> &SessionManager {
        self.interceptor.session()
    }

    /// The interceptor every call goes through.
    pub fn interceptor(&self) -> &Interceptor {
        &self.interceptor
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        self.interceptor.execute(request).await?.json()
    }

    async fn send(&self, request: ApiRequest) -> Result<()> {
        self.interceptor.execute(request).await.map(|_| ())
    }

    /// The signed-in user's profile.
    pub async fn me(&self) -> Result<User> {
        self.fetch(ApiRequest::get("auth/me")).await
    }

    /// Every context the user owns.
    pub async fn list_contexts(&self) -> Result<Vec<Context>> {
        self.fetch(ApiRequest::get("contexts/")).await
    }

    /// One context.
    pub async fn get_context(&self, context_id: &str) -> Result<Context> {
        self.fetch(ApiRequest::get(format!("contexts/{}", segment(context_id)?)))
            .await
    }

    /// Create a context from one or more PDFs.
    pub async fn create_context(&self, name: &str, files: Vec<UploadFile>) -> Result<Context> {
        if name.trim().is_empty() {
            return Err(Error::validation(
                "context name must not be empty",
                Some("name".to_string()),
            ));
        }
        if files.is_empty() {
            return Err(Error::validation(
                "a context needs at least one document",
                Some("files".to_string()),
            ));
        }
        let request = files.into_iter().fold(
            ApiRequest::post("contexts/").with_form_field("name", name.trim()),
            |request, file| request.with_file("files", file),
        );
        self.fetch(request).await
    }

    /// Delete a context and its documents.
    pub async fn delete_context(&self, context_id: &str) -> Result<()> {
        self.send(ApiRequest::delete(format!(
            "contexts/{}",
            segment(context_id)?
        )))
        .await
    }

    /// Documents in a context.
    pub async fn list_documents(&self, context_id: &str) -> Result<Vec<Document>> {
        self.fetch(ApiRequest::get(format!(
            "documents/context/{}",
            segment(context_id)?
        )))
        .await
    }

    /// Add a document to an existing context.
    pub async fn upload_document(
        &self,
        context_id: &str,
        file: UploadFile,
    ) -> Result<DocumentUploadResponse> {
        let request = ApiRequest::post("documents/upload")
            .with_query("context_id", segment(context_id)?)
            .with_file("file", file);
        self.fetch(request).await
    }

    /// Delete one document.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        self.send(ApiRequest::delete(format!(
            "documents/{}",
            segment(document_id)?
        )))
        .await
    }

    /// Past turns of a context's conversation, oldest first.
    pub async fn chat_history(&self, context_id: &str) -> Result<Vec<ChatTurn>> {
        self.fetch(ApiRequest::get(format!(
            "chat/history/{}",
            segment(context_id)?
        )))
        .await
    }

    /// Forget a context's conversation.
    pub async fn clear_chat_history(&self, context_id: &str) -> Result<()> {
        self.send(ApiRequest::delete(format!(
            "chat/{}/clear",
            segment(context_id)?
        )))
        .await
    }
}

/// Validate an identifier used as a single path segment.
pub(crate) fn segment(id: &str) -> Result<&str> {
    let id = id.trim();
    if id.is_empty() || id.contains(['/', '?', '#']) {
        return Err(Error::validation(
            format!("invalid identifier '{id}'"),
            Some("id".to_string()),
        ));
    }
    Ok(id)
}
