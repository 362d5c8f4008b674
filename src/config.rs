//! Client configuration.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! the `DOCCHAT_API_URL` environment variable, then command-line arguments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arrrg_derive::CommandLine;
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::types::ChatMode;

/// Default backend API root.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/";

/// Default timeout for ordinary request/response calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default timeout for establishing a connection, streams included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Environment variable that overrides the API root.
pub const API_URL_ENV: &str = "DOCCHAT_API_URL";

/// Command-line arguments for the docchat-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct DocChatArgs {
    /// Backend API root.
    #[arrrg(optional, "Backend API root (default: http://localhost:8000/api/)", "URL")]
    pub api_url: Option<String>,

    /// YAML configuration file.
    #[arrrg(optional, "YAML configuration file", "FILE")]
    pub config: Option<String>,

    /// Where the refresh token is kept between runs.
    #[arrrg(optional, "File that keeps the session between runs", "FILE")]
    pub store: Option<String>,

    /// Context to open on startup.
    #[arrrg(optional, "Context to chat with on startup", "ID")]
    pub context: Option<String>,

    /// Retrieval mode for chat turns.
    #[arrrg(optional, "Chat mode: standard or deep (default: standard)", "MODE")]
    pub mode: Option<String>,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

impl DocChatArgs {
    /// The requested chat mode, defaulting to standard.
    pub fn chat_mode(&self) -> Result<ChatMode> {
        match &self.mode {
            Some(mode) => mode.parse(),
            None => Ok(ChatMode::default()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_url: Option<String>,
    timeout_secs: Option<u64>,
    connect_timeout_secs: Option<u64>,
    store_path: Option<PathBuf>,
}

/// Resolved settings for talking to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root; always ends with `/`.
    pub api_url: Url,

    /// Whole-request timeout for ordinary calls.
    pub timeout: Duration,

    /// Connection timeout for every call, streams included.
    pub connect_timeout: Duration,

    /// File the refresh token is persisted to; `None` keeps it in memory.
    pub store_path: Option<PathBuf>,
}

impl ClientConfig {
    /// Creates a new ClientConfig with default values.
    pub fn new() -> Self {
        Self {
            api_url: default_api_url(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            store_path: None,
        }
    }

    /// Sets the API root.
    pub fn with_api_url(mut self, api_url: &str) -> Result<Self> {
        self.api_url = normalize_api_url(api_url)?;
        Ok(self)
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connection timeout.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Sets where the session is persisted.
    pub fn with_store_path(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    /// Load settings from a YAML file, on top of the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::io(format!("could not read {}: {e}", path.display()), e))?;
        Self::from_yaml(&content)
    }

    /// Parse settings from YAML text, on top of the defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ConfigFile = serde_yaml::from_str(content)?;
        let mut config = Self::new();
        if let Some(api_url) = file.api_url {
            config = config.with_api_url(&api_url)?;
        }
        if let Some(secs) = file.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.connect_timeout_secs {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if file.store_path.is_some() {
            config.store_path = file.store_path;
        }
        Ok(config)
    }

    /// Apply `DOCCHAT_API_URL` when it is set and non-empty.
    pub fn apply_env(self) -> Result<Self> {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => self.with_api_url(url.trim()),
            _ => Ok(self),
        }
    }

    /// Apply command-line overrides.
    pub fn apply_args(mut self, args: &DocChatArgs) -> Result<Self> {
        if let Some(api_url) = &args.api_url {
            self = self.with_api_url(api_url)?;
        }
        if let Some(store) = &args.store {
            self.store_path = Some(PathBuf::from(store));
        }
        Ok(self)
    }

    /// Resolve the full layering for the command-line tool.
    pub fn resolve(args: &DocChatArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::new(),
        };
        base.apply_env()?.apply_args(args)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("default API URL is valid")
}

/// Parse an API root, requiring http(s) and a trailing slash so endpoint
/// paths join beneath it rather than replacing its last segment.
pub fn normalize_api_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::validation(
            format!("API URL must be http or https, got '{}'", url.scheme()),
            Some("api_url".to_string()),
        ));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
