use crate::error::{Result, ToolCacheError};
use crate::types::RetryPolicy;
use serde::{Deserialize, Serialize, Serializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "toolcache";
pub const CONFIG_FILE_NAME: &str = "config.json";

pub const CACHE_ROOT_VAR: &str = "AGENT_TOOLSDIRECTORY";
pub const LEGACY_CACHE_ROOT_VAR: &str = "AGENT_TOOLCACHE";
pub const TEMP_DIR_VAR: &str = "AGENT_TEMPDIRECTORY";
pub const CONFIG_PATH_VAR: &str = "TOOLCACHE_CONFIG";

/// Locations and knobs every component receives at construction time.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolCacheConfig {
    pub cache_root: PathBuf,
    pub temp_dir: PathBuf,
    pub settings: ToolCacheSettings,
}

impl ToolCacheConfig {
    pub fn new(cache_root: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
            temp_dir: temp_dir.into(),
            settings: ToolCacheSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: ToolCacheSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the configuration from the variables the build agent exports.
    ///
    /// A missing cache root or temp directory is a host misconfiguration and
    /// fails immediately.
    pub fn from_env() -> Result<Self> {
        let cache_root = env_path(CACHE_ROOT_VAR)
            .or_else(|| env_path(LEGACY_CACHE_ROOT_VAR))
            .ok_or(ToolCacheError::MissingConfiguration {
                name: CACHE_ROOT_VAR,
            })?;
        let temp_dir = env_path(TEMP_DIR_VAR).ok_or(ToolCacheError::MissingConfiguration {
            name: TEMP_DIR_VAR,
        })?;
        tracing::debug!("Cache root: {}", cache_root.display());
        tracing::debug!("Temp directory: {}", temp_dir.display());

        Ok(Self {
            cache_root,
            temp_dir,
            settings: load_settings()?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.settings.max_attempts,
            retry_interval: Duration::from_millis(self.settings.retry_interval_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProxySettings {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, serialize_with = "serialize_redacted")]
    pub password: Option<String>,
}

const REDACTED: &str = "-REDACTED-";

/// Secrets never leave the process through `config show`.
fn serialize_redacted<S: Serializer>(
    value: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_some(REDACTED),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCacheSettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub proxy: Option<ProxySettings>,
    /// Decoder used by `extract_7z` when no override tool is given.
    #[serde(default)]
    pub seven_zip_decoder: Option<PathBuf>,
    #[serde(default)]
    pub show_progress: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_retry_interval_ms() -> u64 {
    500
}
fn default_max_redirects() -> usize {
    50
}
fn default_user_agent() -> String {
    format!("{}/{}", APP_NAME, env!("CARGO_PKG_VERSION"))
}

impl Default for ToolCacheSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_interval_ms: default_retry_interval_ms(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            proxy: None,
            seven_zip_decoder: None,
            show_progress: false,
        }
    }
}

impl ToolCacheSettings {
    /// The 7z decoder shipped next to the running executable.
    pub fn bundled_seven_zip_decoder() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        Some(exe.parent()?.join("externals").join("7zdec.exe"))
    }
}

pub fn get_settings_file_path() -> Option<PathBuf> {
    if let Some(path) = env_path(CONFIG_PATH_VAR) {
        return Some(path);
    }
    let path = dirs::config_dir()?.join(APP_NAME).join(CONFIG_FILE_NAME);
    tracing::debug!("Settings file path: {}", path.display());
    Some(path)
}

pub fn load_settings() -> Result<ToolCacheSettings> {
    let mut settings = match get_settings_file_path() {
        Some(path) if path.exists() => read_settings_file(&path)?,
        _ => ToolCacheSettings::default(),
    };
    apply_env_overrides(&mut settings);
    Ok(settings)
}

pub fn read_settings_file(path: &Path) -> Result<ToolCacheSettings> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|source| ToolCacheError::Settings {
        path: path.to_path_buf(),
        source,
    })
}

fn apply_env_overrides(settings: &mut ToolCacheSettings) {
    if let Some(attempts) = env_value("TOOLCACHE_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.max_attempts = attempts;
    }

    if let Some(interval) = env_value("TOOLCACHE_RETRY_INTERVAL_MS").and_then(|v| v.parse().ok())
    {
        settings.retry_interval_ms = interval;
    }

    if let Some(user_agent) = env_value("TOOLCACHE_USER_AGENT") {
        settings.user_agent = user_agent;
    }

    if let Some(url) = env_value("AGENT_PROXYURL") {
        settings.proxy = Some(ProxySettings {
            url,
            username: env_value("AGENT_PROXYUSERNAME"),
            password: env_value("AGENT_PROXYPASSWORD"),
        });
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_path(name: &str) -> Option<PathBuf> {
    env_value(name).map(PathBuf::from)
}
