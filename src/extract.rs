//! Archive extraction
//!
//! Archives are unpacked by the platform's own utilities (`tar`, `unzip`,
//! PowerShell, a 7z decoder) into a scratch directory that the caller then
//! hands to [`ToolCacheStore::cache_dir`](crate::cache::ToolCacheStore::cache_dir).

use crate::config::{ToolCacheConfig, ToolCacheSettings};
use crate::context::{absolute_path, WorkingDirectoryGuard};
use crate::error::{Result, ToolCacheError};
use crate::platform::is_windows;
use crate::types::ArchiveFormat;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const POWERSHELL_ARGS: [&str; 7] = [
    "-NoLogo",
    "-Sta",
    "-NoProfile",
    "-NonInteractive",
    "-ExecutionPolicy",
    "Unrestricted",
    "-Command",
];

pub struct Extractor {
    temp_dir: PathBuf,
    seven_zip_decoder: Option<PathBuf>,
}

impl Extractor {
    pub fn new(config: &ToolCacheConfig) -> Self {
        Self {
            temp_dir: config.temp_dir.clone(),
            seven_zip_decoder: config.settings.seven_zip_decoder.clone(),
        }
    }

    /// Extract a tar archive (compression is detected by `tar` itself).
    pub async fn extract_tar(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        require_file(file)?;
        tracing::info!("Extracting archive {}", file.display());
        let dest = self.create_extract_folder(destination).await?;

        let mut tar = Command::new("tar");
        tar.arg("xC").arg(&dest).arg("-f").arg(file);
        run(tar, "tar").await?;
        Ok(dest)
    }

    pub async fn extract_zip(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        require_file(file)?;
        tracing::info!("Extracting archive {}", file.display());
        let dest = self.create_extract_folder(destination).await?;

        if is_windows() {
            let command = format!(
                "$ErrorActionPreference = 'Stop' ; try {{ Add-Type -AssemblyName System.IO.Compression.FileSystem }} catch {{ }} ; [System.IO.Compression.ZipFile]::ExtractToDirectory('{}', '{}')",
                escape_powershell(file),
                escape_powershell(&dest)
            );

            // UTF-8 console output so non-ASCII entry names survive.
            let chcp = std::env::var_os("windir")
                .map(|windir| PathBuf::from(windir).join("system32").join("chcp.com"))
                .unwrap_or_else(|| PathBuf::from("chcp.com"));
            let mut chcp_cmd = Command::new(chcp);
            chcp_cmd.arg("65001");
            run(chcp_cmd, "chcp").await?;

            let mut powershell = Command::new("powershell");
            powershell.args(POWERSHELL_ARGS).arg(command);
            run(powershell, "powershell").await?;
        } else {
            let mut unzip = Command::new("unzip");
            unzip.arg(absolute_path(file).await?).current_dir(&dest);
            run(unzip, "unzip").await?;
        }

        Ok(dest)
    }

    /// Extract a 7z archive. Windows only.
    ///
    /// `tool_override` replaces the bundled decoder, e.g. with a full 7-Zip
    /// that supports long paths. The process working directory is switched
    /// to the destination for the duration of the call; see
    /// [`WorkingDirectoryGuard`].
    pub async fn extract_7z(
        &self,
        file: &Path,
        destination: Option<&Path>,
        tool_override: Option<&Path>,
    ) -> Result<PathBuf> {
        if !is_windows() {
            return Err(ToolCacheError::UnsupportedPlatform {
                operation: "extract7z()",
            });
        }
        require_file(file)?;
        tracing::info!("Extracting archive {}", file.display());
        let dest = self.create_extract_folder(destination).await?;

        let cwd = WorkingDirectoryGuard::enter(&dest).await?;
        let file = cwd.original().join(file);
        match tool_override {
            Some(tool) => {
                let mut seven_zip = Command::new(tool);
                seven_zip.args(seven_zip_override_args(&file));
                run(seven_zip, &tool.display().to_string()).await?;
            }
            None => {
                let decoder = self
                    .seven_zip_decoder
                    .clone()
                    .or_else(ToolCacheSettings::bundled_seven_zip_decoder)
                    .ok_or_else(|| {
                        ToolCacheError::validation("Could not locate the bundled 7z decoder")
                    })?;
                let mut seven_zip = Command::new(&decoder);
                seven_zip.arg("x").arg(&file);
                run(seven_zip, "7zdec").await?;
            }
        }

        Ok(dest)
    }

    /// Extract by file extension.
    pub async fn extract_archive(&self, file: &Path, destination: Option<&Path>) -> Result<PathBuf> {
        match ArchiveFormat::from_path(file) {
            Some(ArchiveFormat::Tar) => self.extract_tar(file, destination).await,
            Some(ArchiveFormat::Zip) => self.extract_zip(file, destination).await,
            Some(ArchiveFormat::SevenZip) => self.extract_7z(file, destination, None).await,
            None => Err(ToolCacheError::validation(format!(
                "Unsupported archive format: {}",
                file.display()
            ))),
        }
    }

    /// Create the destination directory, generating a unique one under the
    /// temp directory when none is given.
    pub async fn create_extract_folder(&self, destination: Option<&Path>) -> Result<PathBuf> {
        let dest = match destination {
            Some(dest) => dest.to_path_buf(),
            None => self.temp_dir.join(uuid::Uuid::new_v4().to_string()),
        };
        tokio::fs::create_dir_all(&dest).await?;
        tracing::debug!("Extract destination {}", dest.display());
        Ok(dest)
    }
}

fn require_file(file: &Path) -> Result<()> {
    if file.as_os_str().is_empty() {
        return Err(ToolCacheError::validation("parameter 'file' is required"));
    }
    Ok(())
}

/// `x` extract with full paths, `-bb1` log level, `-bd` no progress
/// indicator, `-sccUTF-8` console charset.
pub fn seven_zip_override_args(file: &Path) -> Vec<std::ffi::OsString> {
    vec![
        "x".into(),
        "-bb1".into(),
        "-bd".into(),
        "-sccUTF-8".into(),
        file.as_os_str().to_owned(),
    ]
}

/// Quote for a single-quoted PowerShell string literal: double single
/// quotes, drop double quotes and line breaks.
pub fn escape_powershell(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\'', "''")
        .replace(['"', '\n', '\r'], "")
}

async fn run(mut cmd: Command, program: &str) -> Result<()> {
    tracing::debug!("Running {:?}", cmd);
    let output = cmd.output().await.map_err(|e| ToolCacheError::Subprocess {
        program: program.to_string(),
        code: None,
        output: e.to_string(),
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        tracing::debug!("{}", stdout.trim_end());
    }

    if !output.status.success() {
        let combined = [stdout.trim(), stderr.trim()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        return Err(ToolCacheError::Subprocess {
            program: program.to_string(),
            code: output.status.code(),
            output: combined,
        });
    }
    Ok(())
}
