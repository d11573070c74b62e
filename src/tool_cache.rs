//! The public face of the crate: every acquisition operation behind one
//! value constructed from a [`ToolCacheConfig`].

use crate::cache::ToolCacheStore;
use crate::config::ToolCacheConfig;
use crate::context::ExecutionContext;
use crate::download::Downloader;
use crate::error::{Result, ToolCacheError};
use crate::extract::Extractor;
use crate::platform::host_arch;
use crate::types::{ArchiveFormat, DownloadOptions, RetryPolicy, ToolCacheEntry};
use crate::version::{clean_version, evaluate_versions, is_explicit_version};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A page to scrape available versions from when the requested version is a
/// range.
#[derive(Debug, Clone)]
pub struct ScrapeSource {
    pub url: String,
    pub pattern: String,
}

/// Everything `acquire` needs to resolve, download and cache one tool.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub tool: String,
    pub version_spec: String,
    /// Download URL with `{version}` and `{arch}` placeholders.
    pub url_template: String,
    pub arch: Option<String>,
    pub scrape: Option<ScrapeSource>,
    pub download: DownloadOptions,
    /// Cache the archive as extracted. When unset, an archive whose only
    /// top-level entry is a directory is cached from inside that directory.
    pub keep_root_folder: bool,
}

impl AcquireRequest {
    pub fn new(
        tool: impl Into<String>,
        version_spec: impl Into<String>,
        url_template: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            version_spec: version_spec.into(),
            url_template: url_template.into(),
            arch: None,
            scrape: None,
            download: DownloadOptions::default(),
            keep_root_folder: false,
        }
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_keep_root_folder(mut self, keep_root_folder: bool) -> Self {
        self.keep_root_folder = keep_root_folder;
        self
    }

    pub fn with_scrape(mut self, url: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.scrape = Some(ScrapeSource {
            url: url.into(),
            pattern: pattern.into(),
        });
        self
    }
}

pub struct ToolCache {
    config: ToolCacheConfig,
    store: ToolCacheStore,
    downloader: Downloader,
    extractor: Extractor,
}

impl ToolCache {
    pub fn new(config: ToolCacheConfig) -> Result<Self> {
        Ok(Self {
            store: ToolCacheStore::new(&config.cache_root),
            downloader: Downloader::new(&config)?,
            extractor: Extractor::new(&config),
            config,
        })
    }

    /// Configure from the build agent's environment.
    pub fn from_env() -> Result<Self> {
        Self::new(ToolCacheConfig::from_env()?)
    }

    pub fn config(&self) -> &ToolCacheConfig {
        &self.config
    }

    pub fn store(&self) -> &ToolCacheStore {
        &self.store
    }

    pub fn find_local_tool(
        &self,
        tool: &str,
        version_spec: &str,
        arch: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        self.store.find_local_tool(tool, version_spec, arch)
    }

    pub fn find_local_tool_versions(&self, tool: &str, arch: Option<&str>) -> Result<Vec<String>> {
        self.store.find_local_tool_versions(tool, arch)
    }

    pub fn list_entries(&self) -> Result<Vec<ToolCacheEntry>> {
        self.store.list_entries()
    }

    pub fn cache_dir(
        &self,
        source_dir: &Path,
        tool: &str,
        version: &str,
        arch: Option<&str>,
    ) -> Result<PathBuf> {
        self.store.cache_dir(source_dir, tool, version, arch)
    }

    pub fn cache_file(
        &self,
        source_file: &Path,
        target_file_name: &str,
        tool: &str,
        version: &str,
        arch: Option<&str>,
    ) -> Result<PathBuf> {
        self.store
            .cache_file(source_file, target_file_name, tool, version, arch)
    }

    pub async fn download_tool(&self, url: &str, options: &DownloadOptions) -> Result<PathBuf> {
        self.downloader.download_tool(url, options).await
    }

    /// Download using the retry budget from the configuration.
    pub async fn download_tool_with_retries(
        &self,
        url: &str,
        options: &DownloadOptions,
    ) -> Result<PathBuf> {
        self.download_with_policy(url, options, self.config.retry_policy())
            .await
    }

    pub async fn download_with_policy(
        &self,
        url: &str,
        options: &DownloadOptions,
        policy: RetryPolicy,
    ) -> Result<PathBuf> {
        self.downloader
            .download_tool_with_retries(url, options, policy)
            .await
    }

    pub async fn extract_tar(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        self.extractor.extract_tar(file, destination).await
    }

    pub async fn extract_zip(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        self.extractor.extract_zip(file, destination).await
    }

    pub async fn extract_7z(
        &self,
        file: &Path,
        destination: Option<&Path>,
        tool_override: Option<&Path>,
    ) -> Result<PathBuf> {
        self.extractor
            .extract_7z(file, destination, tool_override)
            .await
    }

    pub async fn extract_archive(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        self.extractor.extract_archive(file, destination).await
    }

    /// Prepend `tool_path` to the context's PATH and print the agent
    /// directive that persists it for later steps.
    pub fn prepend_path(&self, context: &mut ExecutionContext, tool_path: &Path) -> Result<()> {
        let directive = context.prepend_path(tool_path)?;
        println!("{}", directive);
        Ok(())
    }

    /// Fetch `url` and collect every match of `pattern` as a cleaned version,
    /// de-duplicated in first-seen order.
    pub async fn scrape(&self, url: &str, pattern: &str) -> Result<Vec<String>> {
        let re = Regex::new(pattern)?;
        let body = self
            .downloader
            .fetch_text(url, &DownloadOptions::default())
            .await?;
        let versions = scrape_versions(&body, &re);
        tracing::debug!("Scraped {} versions from {}", versions.len(), url);
        Ok(versions)
    }

    /// Resolve a version, download, extract and cache a tool unless the
    /// cache already holds a match. Returns the cache path.
    pub async fn acquire(&self, request: &AcquireRequest) -> Result<PathBuf> {
        let arch = request.arch.clone().unwrap_or_else(host_arch);

        if let Some(path) =
            self.store
                .find_local_tool(&request.tool, &request.version_spec, Some(&arch))?
        {
            tracing::info!("Found {} {} in cache", request.tool, request.version_spec);
            return Ok(path);
        }

        let version = self.resolve_version(request).await?;
        if let Some(path) = self.store.find_local_tool(&request.tool, &version, Some(&arch))? {
            return Ok(path);
        }

        let url = request
            .url_template
            .replace("{version}", &version)
            .replace("{arch}", &arch);
        let file_name = download_file_name(&url).unwrap_or_else(|| request.tool.clone());
        let download_dir = PathBuf::from(uuid::Uuid::new_v4().to_string());
        let options = request
            .download
            .clone()
            .with_file_name(download_dir.join(&file_name));

        let scratch = self.config.temp_dir.join(&download_dir);

        let result = match self.download_tool_with_retries(&url, &options).await {
            Ok(downloaded) => {
                self.install_download(&downloaded, &file_name, request, &version, &arch)
                    .await
            }
            Err(e) => Err(e),
        };
        remove_scratch(&scratch);
        result
    }

    async fn install_download(
        &self,
        downloaded: &Path,
        file_name: &str,
        request: &AcquireRequest,
        version: &str,
        arch: &str,
    ) -> Result<PathBuf> {
        let tool = request.tool.as_str();
        if ArchiveFormat::from_path(downloaded).is_none() {
            make_executable(downloaded)?;
            return self
                .store
                .cache_file(downloaded, file_name, tool, version, Some(arch));
        }

        let extracted = self.extractor.create_extract_folder(None).await?;
        let cached = match self
            .extractor
            .extract_archive(downloaded, Some(&extracted))
            .await
        {
            Ok(_) => install_root(&extracted, request.keep_root_folder).and_then(|root| {
                self.store.cache_dir(&root, tool, version, Some(arch))
            }),
            Err(e) => Err(e),
        };
        remove_scratch(&extracted);
        cached
    }

    async fn resolve_version(&self, request: &AcquireRequest) -> Result<String> {
        if is_explicit_version(&request.version_spec) {
            return clean_version(&request.version_spec).ok_or_else(|| {
                ToolCacheError::validation(format!("Invalid version '{}'", request.version_spec))
            });
        }

        let source = request.scrape.as_ref().ok_or_else(|| {
            ToolCacheError::validation(format!(
                "'{}' is a version range and no listing to scrape was given",
                request.version_spec
            ))
        })?;
        let available = self.scrape(&source.url, &source.pattern).await?;
        let version = evaluate_versions(&available, &request.version_spec).ok_or_else(|| {
            ToolCacheError::validation(format!(
                "Unable to find {} version '{}'",
                request.tool, request.version_spec
            ))
        })?;
        tracing::info!("Resolved {} {} to {}", request.tool, request.version_spec, version);
        Ok(version)
    }
}

pub fn scrape_versions(body: &str, pattern: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();
    pattern
        .find_iter(body)
        .filter_map(|m| clean_version(m.as_str()))
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Directory to cache from an extracted archive: the archive's single
/// top-level directory unless `keep_root_folder` is set.
pub fn install_root(extracted: &Path, keep_root_folder: bool) -> Result<PathBuf> {
    if keep_root_folder {
        return Ok(extracted.to_path_buf());
    }

    let mut entries = std::fs::read_dir(extracted)?;
    match (entries.next(), entries.next()) {
        (Some(only), None) => {
            let only = only?;
            if only.file_type()?.is_dir() {
                tracing::debug!("Stripping root folder {}", only.file_name().to_string_lossy());
                Ok(only.path())
            } else {
                Ok(extracted.to_path_buf())
            }
        }
        _ => Ok(extracted.to_path_buf()),
    }
}

/// Last path segment of a URL, ignoring query and fragment.
pub fn download_file_name(url: &str) -> Option<String> {
    let url = reqwest::Url::parse(url).ok()?;
    let name = url.path_segments()?.last()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(perms.mode() | 0o755);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn remove_scratch(dir: &Path) {
    if let Err(e) = std::fs::remove_dir_all(dir) {
        tracing::debug!("Could not remove {}: {}", dir.display(), e);
    }
}
