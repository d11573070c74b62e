use crate::config::ToolCacheConfig;
use crate::error::{Result, ToolCacheError};
use crate::types::{DownloadOptions, RetryPolicy};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use regex::Regex;
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct Downloader {
    client: reqwest::Client,
    temp_dir: PathBuf,
    show_progress: bool,
}

impl Downloader {
    pub fn new(config: &ToolCacheConfig) -> Result<Self> {
        let settings = &config.settings;
        let mut builder = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .redirect(Policy::limited(settings.max_redirects));

        if let Some(proxy) = &settings.proxy {
            let mut proxy_config =
                reqwest::Proxy::all(&proxy.url).map_err(ToolCacheError::HttpClient)?;
            if let Some(username) = &proxy.username {
                proxy_config =
                    proxy_config.basic_auth(username, proxy.password.as_deref().unwrap_or(""));
            }
            tracing::debug!("Using proxy {}", proxy.url);
            builder = builder.proxy(proxy_config);
        }

        Ok(Self {
            client: builder.build().map_err(ToolCacheError::HttpClient)?,
            temp_dir: config.temp_dir.clone(),
            show_progress: settings.show_progress,
        })
    }

    /// Resolve where a download lands: absolute names are kept, relative
    /// names go under the temp directory, and no name means a fresh UUID.
    pub fn destination_path(&self, file_name: Option<&Path>) -> PathBuf {
        match file_name {
            Some(name) if name.is_absolute() => name.to_path_buf(),
            Some(name) => self.temp_dir.join(name),
            None => self.temp_dir.join(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Download a tool from a URL and stream it into a file.
    ///
    /// Only a 200 response is accepted. The destination must not exist yet,
    /// and a partially written file is removed when the transfer fails.
    pub async fn download_tool(&self, url: &str, options: &DownloadOptions) -> Result<PathBuf> {
        let dest_path = self.destination_path(options.file_name.as_deref());
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading: {}", redact_url(url));
        tracing::debug!("Destination {}", dest_path.display());

        if fs::try_exists(&dest_path).await? {
            return Err(ToolCacheError::DestinationExists(dest_path));
        }

        let response = self.get(url, options).await?;
        if response.status() != StatusCode::OK {
            let status = response.status();
            tracing::debug!(
                "Failed to download \"{}\" from \"{}\". Code({}) Message({})",
                dest_path.display(),
                redact_url(url),
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            );
            return Err(ToolCacheError::Http {
                url: redact_url(url),
                status_code: status.as_u16(),
            });
        }

        let content_length = response.content_length();
        match content_length {
            Some(len) => tracing::debug!("Content-Length of downloaded file: {}", len),
            None => tracing::debug!("Content-Length header missing"),
        }

        match self.write_body(response, &dest_path, content_length).await {
            Ok(written) => {
                tracing::debug!("download complete");
                self.check_size(&dest_path, content_length, written).await;
                Ok(dest_path)
            }
            Err(e) => {
                if let Err(remove_err) = fs::remove_file(&dest_path).await {
                    tracing::debug!(
                        "Could not remove partial download {}: {}",
                        dest_path.display(),
                        remove_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Download with up to `policy.max_attempts` attempts.
    ///
    /// Only transient failures (transport errors and 502/503/504) are
    /// retried; attempt `n` waits `n * retry_interval` before the next one.
    /// The last error is returned unchanged once the budget is spent.
    pub async fn download_tool_with_retries(
        &self,
        url: &str,
        options: &DownloadOptions,
        policy: RetryPolicy,
    ) -> Result<PathBuf> {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.download_tool(url, options).await {
                Ok(path) => return Ok(path),
                Err(e) if attempt < max_attempts && e.is_retryable() => {
                    let delay = policy.retry_interval * attempt;
                    tracing::debug!(
                        "Attempt {} failed ({}). Retrying after {} ms",
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a page body, e.g. a directory listing to scrape versions from.
    pub async fn fetch_text(&self, url: &str, options: &DownloadOptions) -> Result<String> {
        let response = self.get(url, options).await?;
        if response.status() != StatusCode::OK {
            return Err(ToolCacheError::Http {
                url: redact_url(url),
                status_code: response.status().as_u16(),
            });
        }
        response.text().await.map_err(|source| ToolCacheError::Transport {
            url: redact_url(url),
            source,
        })
    }

    async fn get(&self, url: &str, options: &DownloadOptions) -> Result<reqwest::Response> {
        let mut request = self.client.get(url);
        for handler in &options.auth_handlers {
            request = handler.apply(request);
        }
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        request
            .send()
            .await
            .map_err(|source| ToolCacheError::Transport {
                url: redact_url(url),
                source,
            })
    }

    async fn write_body(
        &self,
        response: reqwest::Response,
        dest_path: &Path,
        content_length: Option<u64>,
    ) -> Result<u64> {
        let url = redact_url(response.url().as_str());
        let pb = self.progress_bar(dest_path, content_length);

        let mut file = fs::File::create(dest_path).await?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| ToolCacheError::Transport {
                url: url.clone(),
                source,
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            pb.set_position(written);
        }
        file.flush().await?;
        file.sync_all().await?;

        pb.finish_and_clear();
        Ok(written)
    }

    fn progress_bar(&self, dest_path: &Path, content_length: Option<u64>) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(content_length.unwrap_or(0));
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }
        let file_name = dest_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        pb.set_message(format!("Downloading {}", file_name));
        pb
    }

    async fn check_size(&self, dest_path: &Path, content_length: Option<u64>, written: u64) {
        let on_disk = match fs::metadata(dest_path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                tracing::warn!(
                    "Unable to check file size of {} due to error: {}",
                    dest_path.display(),
                    e
                );
                return;
            }
        };
        tracing::debug!("Downloaded file size: {} bytes ({} streamed)", on_disk, written);

        if let Some(expected) = content_length {
            if expected != on_disk {
                tracing::warn!(
                    "Content-Length ({} bytes) did not match downloaded file size ({} bytes).",
                    expected,
                    on_disk
                );
            }
        }
    }
}

/// Hide the signature of pre-signed storage URLs before logging them.
pub fn redact_url(url: &str) -> String {
    static SIG: OnceLock<Option<Regex>> = OnceLock::new();
    match SIG.get_or_init(|| Regex::new(r"sig=[^&]*").ok()) {
        Some(re) => re.replace(url, "sig=-REDACTED-").into_owned(),
        None => url.to_string(),
    }
}
