//! Process-wide state the acquisition flow touches: the `PATH` handed to
//! later pipeline steps and the working directory during 7z extraction.

use crate::error::{Result, ToolCacheError};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, MutexGuard};

/// Agent logging command that persists a PATH prefix for subsequent steps.
pub const PREPEND_PATH_COMMAND: &str = "##vso[task.prependpath]";

const PATH_DELIMITER: &str = if cfg!(windows) { ";" } else { ":" };

static WORKING_DIRECTORY_LOCK: Mutex<()> = Mutex::const_new(());

/// Explicit stand-in for the process environment's `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    path: OsString,
}

impl ExecutionContext {
    pub fn from_env() -> Self {
        Self {
            path: std::env::var_os("PATH").unwrap_or_default(),
        }
    }

    pub fn with_path(path: impl Into<OsString>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &OsStr {
        &self.path
    }

    pub fn path_entries(&self) -> Vec<PathBuf> {
        std::env::split_paths(&self.path).collect()
    }

    /// Put `tool_path` in front of the context's PATH and return the agent
    /// directive that carries the change to later steps.
    pub fn prepend_path(&mut self, tool_path: &Path) -> Result<String> {
        if tool_path.as_os_str().is_empty() {
            return Err(ToolCacheError::validation(
                "Parameter toolPath must not be null or empty",
            ));
        }
        if !tool_path.is_dir() {
            return Err(ToolCacheError::validation(format!(
                "Directory does not exist: {}",
                tool_path.display()
            )));
        }
        std::env::join_paths([tool_path]).map_err(|_| {
            ToolCacheError::validation(format!(
                "Path contains the PATH delimiter: {}",
                tool_path.display()
            ))
        })?;

        tracing::info!(
            "Prepending PATH environment variable with directory: {}",
            tool_path.display()
        );
        let mut new_path = tool_path.as_os_str().to_owned();
        if !self.path.is_empty() {
            new_path.push(PATH_DELIMITER);
            new_path.push(&self.path);
        }
        tracing::debug!("new Path: {}", new_path.to_string_lossy());
        self.path = new_path;

        Ok(format!("{}{}", PREPEND_PATH_COMMAND, tool_path.display()))
    }

    /// Write the context's PATH into this process's environment.
    pub fn export(&self) {
        std::env::set_var("PATH", &self.path);
    }

    /// A command that resolves programs against the context's PATH.
    pub fn command(&self, program: impl AsRef<OsStr>) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(program);
        cmd.env("PATH", &self.path);
        cmd
    }
}

/// Exclusive change of the process working directory, restored on drop.
///
/// Holding the guard serializes every caller in the process, so nothing else
/// observes the temporary directory.
pub struct WorkingDirectoryGuard {
    original: PathBuf,
    _lock: MutexGuard<'static, ()>,
}

impl WorkingDirectoryGuard {
    /// Working directory captured under the lock before the change.
    pub fn original(&self) -> &Path {
        &self.original
    }

    pub async fn enter(dir: &Path) -> Result<Self> {
        let lock = WORKING_DIRECTORY_LOCK.lock().await;
        let original = std::env::current_dir()?;
        std::env::set_current_dir(dir)?;
        tracing::debug!("Changed working directory to {}", dir.display());
        Ok(Self {
            original,
            _lock: lock,
        })
    }
}

/// Resolve `path` against the process working directory without racing a
/// [`WorkingDirectoryGuard`] held elsewhere.
pub async fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let _lock = WORKING_DIRECTORY_LOCK.lock().await;
    Ok(std::env::current_dir()?.join(path))
}

impl Drop for WorkingDirectoryGuard {
    fn drop(&mut self) {
        if let Err(e) = std::env::set_current_dir(&self.original) {
            tracing::warn!(
                "Could not restore working directory {}: {}",
                self.original.display(),
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepend_path_puts_tool_first() {
        let dir = TempDir::new().unwrap();
        let original = std::env::join_paths(["/usr/bin", "/bin"]).unwrap();
        let mut ctx = ExecutionContext::with_path(original);

        let directive = ctx.prepend_path(dir.path()).unwrap();

        assert_eq!(
            directive,
            format!("##vso[task.prependpath]{}", dir.path().display())
        );
        let entries = ctx.path_entries();
        assert_eq!(entries[0], dir.path());
        assert_eq!(&entries[1..], &[PathBuf::from("/usr/bin"), PathBuf::from("/bin")]);
    }

    #[test]
    fn test_prepend_path_on_empty_path() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::default();
        ctx.prepend_path(dir.path()).unwrap();
        assert_eq!(ctx.path(), dir.path().as_os_str());
    }

    #[test]
    fn test_prepend_path_rejects_missing_or_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "").unwrap();
        let mut ctx = ExecutionContext::with_path("/usr/bin");

        assert!(ctx.prepend_path(Path::new("")).is_err());
        assert!(ctx.prepend_path(&dir.path().join("missing")).is_err());
        assert!(ctx.prepend_path(&file).is_err());
        assert_eq!(ctx.path(), OsStr::new("/usr/bin"));
    }

    #[test]
    fn test_export_writes_process_path() {
        let dir = TempDir::new().unwrap();
        temp_env::with_var("PATH", Some("/usr/bin"), || {
            let mut ctx = ExecutionContext::from_env();
            ctx.prepend_path(dir.path()).unwrap();
            ctx.export();

            let path = std::env::var_os("PATH").unwrap();
            assert_eq!(std::env::split_paths(&path).next().unwrap(), dir.path());
        });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_uses_context_path() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ExecutionContext::with_path("/usr/bin:/bin");
        ctx.prepend_path(dir.path()).unwrap();

        let output = ctx
            .command("sh")
            .args(["-c", "echo \"$PATH\""])
            .output()
            .await
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.trim().starts_with(&dir.path().display().to_string()));
    }

    #[tokio::test]
    async fn test_working_directory_guard_restores() {
        let dir = TempDir::new().unwrap();
        let guard = WorkingDirectoryGuard::enter(dir.path()).await.unwrap();
        assert_eq!(
            std::env::current_dir().unwrap().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        let before = guard.original().to_path_buf();
        drop(guard);

        let _lock = WORKING_DIRECTORY_LOCK.lock().await;
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn test_absolute_path_waits_for_guard() {
        let dir = TempDir::new().unwrap();

        let guard = WorkingDirectoryGuard::enter(dir.path()).await.unwrap();
        let before = guard.original().to_path_buf();
        assert_ne!(
            before.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
        let pending = tokio::spawn(absolute_path(Path::new("tool.zip")));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        drop(guard);
        assert_eq!(pending.await.unwrap().unwrap(), before.join("tool.zip"));

        let absolute = dir.path().join("tool.zip");
        assert_eq!(absolute_path(&absolute).await.unwrap(), absolute);
    }
}
