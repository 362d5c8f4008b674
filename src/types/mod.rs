// Public modules
pub mod auth;
pub mod chat_mode;
pub mod chat_turn;
pub mod context;
pub mod credentials;
pub mod document;
pub mod source;
pub mod stream_payload;
pub mod user;

// Re-exports
pub use auth::{
    LoginRequest, LoginResponse, OAuthProvider, RefreshRequest, RefreshResponse, SignupRequest,
};
pub use chat_mode::ChatMode;
pub use chat_turn::{ChatRole, ChatTurn};
pub use context::Context;
pub use credentials::CredentialPair;
pub use document::{Document, DocumentStatus, DocumentUploadResponse, UploadFile};
pub use source::Source;
pub use stream_payload::{DONE_SENTINEL, StreamFrame, StreamPayload};
pub use user::User;
