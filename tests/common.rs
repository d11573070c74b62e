use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;
use toolcache::ToolCacheConfig;

// Not every test binary uses every helper.
#[allow(dead_code)]
pub struct TestContext {
    pub _temp_dir: TempDir,
    pub cache_root: PathBuf,
    pub temp_dir: PathBuf,
    pub config_path: PathBuf,
    pub bin_path: PathBuf,
}

#[allow(dead_code)]
impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let cache_root = temp_dir.path().join("hostedtoolcache");
        let agent_temp = temp_dir.path().join("agent-temp");
        let config_path = temp_dir.path().join("config.json");

        let bin_path = PathBuf::from(env!("CARGO_BIN_EXE_toolcache"));

        Self {
            _temp_dir: temp_dir,
            cache_root,
            temp_dir: agent_temp,
            config_path,
            bin_path,
        }
    }

    pub fn root(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Library configuration pointing at this context's directories, with
    /// retries that do not slow the tests down.
    pub fn config(&self) -> ToolCacheConfig {
        let mut config = ToolCacheConfig::new(&self.cache_root, &self.temp_dir);
        config.settings.retry_interval_ms = 10;
        config
    }

    pub fn cmd(&self) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.env("AGENT_TOOLSDIRECTORY", &self.cache_root);
        cmd.env("AGENT_TEMPDIRECTORY", &self.temp_dir);
        cmd.env("TOOLCACHE_CONFIG", &self.config_path);
        cmd.env("TOOLCACHE_RETRY_INTERVAL_MS", "10");
        for var in [
            "AGENT_TOOLCACHE",
            "AGENT_PROXYURL",
            "AGENT_PROXYUSERNAME",
            "AGENT_PROXYPASSWORD",
            "TOOLCACHE_TOKEN",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }

    /// Write `files` (relative path, content) under a fresh directory.
    pub fn make_dir(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root().join(name);
        for (rel, content) in files {
            let path = dir.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

#[allow(dead_code)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: std::process::ExitStatus,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status,
        }
    }
}

#[allow(dead_code)]
impl CommandOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.status.success() {
            panic!(
                "Command failed with status {:?}\nstdout: {}\nstderr: {}",
                self.status.code(),
                self.stdout,
                self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self, code: i32) -> &Self {
        assert_eq!(
            self.status.code(),
            Some(code),
            "Unexpected exit status\nstdout: {}\nstderr: {}",
            self.stdout,
            self.stderr
        );
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        assert!(
            self.stdout.contains(text),
            "Stdout did not contain '{}'\nActual stdout: {}",
            text,
            self.stdout
        );
        self
    }

    pub fn assert_stderr_contains(&self, text: &str) -> &Self {
        assert!(
            self.stderr.contains(text),
            "Stderr did not contain '{}'\nActual stderr: {}",
            text,
            self.stderr
        );
        self
    }

    pub fn stdout_line(&self) -> &str {
        self.stdout.trim()
    }
}
