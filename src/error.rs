//! Error taxonomy for tool acquisition
//!
//! Every failure the library can surface is one variant of [`ToolCacheError`].
//! Callers that need to branch on an HTTP outcome use
//! [`ToolCacheError::http_status_code`] instead of matching on messages.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ToolCacheError>;

#[derive(Debug, Error)]
pub enum ToolCacheError {
    /// A value the hosting agent is expected to provide is missing.
    #[error("{name} is not set. It should have been set by the agent. Try updating your agent.")]
    MissingConfiguration { name: &'static str },

    #[error("{0}")]
    Validation(String),

    #[error("Unexpected HTTP response: {status_code}")]
    Http { url: String, status_code: u16 },

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Destination file path already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    #[error("{program} exited with {}: {output}", exit_code_label(.code))]
    Subprocess {
        program: String,
        code: Option<i32>,
        output: String,
    },

    #[error("{operation} is not supported on the current OS")]
    UnsupportedPlatform { operation: &'static str },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Could not parse settings file {}: {source}", .path.display())]
    Settings {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code".to_string(),
    }
}

impl ToolCacheError {
    pub fn validation(message: impl Into<String>) -> Self {
        ToolCacheError::Validation(message.into())
    }

    /// Status code of the HTTP response that caused this error, if one was received.
    pub fn http_status_code(&self) -> Option<u16> {
        match self {
            ToolCacheError::Http { status_code, .. } => Some(*status_code),
            ToolCacheError::Transport { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether another download attempt may succeed.
    ///
    /// Transport failures and 502/503/504 are transient; everything else,
    /// including other non-200 statuses, is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            ToolCacheError::Transport { .. } => true,
            ToolCacheError::Http { status_code, .. } => is_retryable_status(*status_code),
            _ => false,
        }
    }
}

pub fn is_retryable_status(status_code: u16) -> bool {
    matches!(status_code, 502 | 503 | 504)
}
