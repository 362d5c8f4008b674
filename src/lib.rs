// Public modules
pub mod chat;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod interceptor;
pub mod observability;
pub mod session;
pub mod sse;
pub mod store;
pub mod stream;
pub mod testing;
pub mod transport;
pub mod types;
pub mod utils;

// Re-exports
pub use client::ApiClient;
pub use config::{ClientConfig, DocChatArgs};
pub use conversation::Conversation;
pub use error::{Error, ErrorKind, Result};
pub use interceptor::Interceptor;
pub use observability::register_biometrics;
pub use session::{SessionEvent, SessionManager};
pub use stream::{
    Callbacks, ChatRequest, ChatStreamClient, StreamHandler, StreamSession, StreamState,
};
pub use types::*;
