use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
}

/// One completed installation in the tool cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCacheEntry {
    pub tool: String,
    pub version: String,
    pub arch: String,
    pub path: PathBuf,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Credentials attached to outgoing download requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthHandler {
    Basic { username: String, password: String },
    Bearer { token: String },
    PersonalAccessToken { token: String },
}

impl AuthHandler {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self {
            AuthHandler::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            AuthHandler::Bearer { token } => request.bearer_auth(token),
            AuthHandler::PersonalAccessToken { token } => request.basic_auth("PAT", Some(token)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Destination file. Relative names land in the temp directory; absolute
    /// paths are used as-is. A random name is generated when unset.
    pub file_name: Option<PathBuf>,
    pub auth_handlers: Vec<AuthHandler>,
    pub headers: Vec<(String, String)>,
}

impl DownloadOptions {
    pub fn with_file_name(mut self, file_name: impl Into<PathBuf>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_auth(mut self, handler: AuthHandler) -> Self {
        self.auth_handlers.push(handler);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
    SevenZip,
}

impl ArchiveFormat {
    const TAR_SUFFIXES: [&'static str; 7] = [
        ".tar", ".tar.gz", ".tgz", ".tar.xz", ".txz", ".tar.bz2", ".tbz2",
    ];

    /// Detect the archive format from a file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        if Self::TAR_SUFFIXES.iter().any(|ext| name.ends_with(ext)) {
            Some(ArchiveFormat::Tar)
        } else if name.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if name.ends_with(".7z") {
            Some(ArchiveFormat::SevenZip)
        } else {
            None
        }
    }
}
