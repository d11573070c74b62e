//! On-disk tool cache
//!
//! Layout: `<root>/<tool>/<version>/<arch>/` holds an installed tool and the
//! empty sibling file `<root>/<tool>/<version>/<arch>.complete` marks it as
//! usable. A directory without its marker is an abandoned install and is
//! treated as absent; the next cache operation for that key clears it.
//!
//! There is no locking. Two processes caching the same key at the same time
//! can interleave.

use crate::error::{Result, ToolCacheError};
use crate::platform::host_arch;
use crate::types::ToolCacheEntry;
use crate::version::{clean_version, evaluate_versions, is_explicit_version};
use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const COMPLETE_MARKER_SUFFIX: &str = ".complete";

#[derive(Debug, Clone)]
pub struct ToolCacheStore {
    root: PathBuf,
}

impl ToolCacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical directory for a (tool, version, arch) key. The version is
    /// cleaned when it is a valid semantic version and used verbatim otherwise.
    pub fn tool_path(&self, tool: &str, version: &str, arch: &str) -> PathBuf {
        let version = clean_version(version).unwrap_or_else(|| version.to_string());
        self.root.join(tool).join(version).join(arch)
    }

    /// Finds the path to a tool in the local cache.
    ///
    /// A range spec is first resolved against the locally cached versions.
    /// Returns `None` unless both the directory and its completion marker
    /// exist.
    pub fn find_local_tool(
        &self,
        tool: &str,
        version_spec: &str,
        arch: Option<&str>,
    ) -> Result<Option<PathBuf>> {
        validate_tool_name(tool)?;
        if version_spec.trim().is_empty() {
            return Err(ToolCacheError::validation(
                "versionSpec parameter is required",
            ));
        }
        let arch = resolve_arch(arch);

        let version = if is_explicit_version(version_spec) {
            Some(version_spec.to_string())
        } else {
            let local_versions = self.find_local_tool_versions(tool, Some(&arch))?;
            evaluate_versions(&local_versions, version_spec)
        };

        let Some(version) = version else {
            tracing::debug!("No cached version of {} satisfies {}", tool, version_spec);
            return Ok(None);
        };

        let cache_path = self.tool_path(tool, &version, &arch);
        tracing::debug!("Checking cache path: {}", cache_path.display());
        if is_complete(&cache_path) {
            tracing::debug!("Found tool in cache {} {} {}", tool, version, arch);
            Ok(Some(cache_path))
        } else {
            tracing::debug!("Unable to locate {} {} {}", tool, version, arch);
            Ok(None)
        }
    }

    /// Versions of `tool` that have a completed install for `arch`, cleaned
    /// and in directory order.
    pub fn find_local_tool_versions(&self, tool: &str, arch: Option<&str>) -> Result<Vec<String>> {
        validate_tool_name(tool)?;
        let arch = resolve_arch(arch);
        let tool_dir = self.root.join(tool);

        let mut versions = Vec::new();
        if !tool_dir.is_dir() {
            return Ok(versions);
        }

        for entry in fs::read_dir(&tool_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(version) = clean_version(&name) else {
                continue;
            };
            if is_complete(&entry.path().join(&arch)) {
                versions.push(version);
            }
        }

        tracing::debug!("Found {} cached versions of {}", versions.len(), tool);
        Ok(versions)
    }

    /// Caches a directory and installs it into the tool cache.
    ///
    /// Any previous install for the same key is removed first. Children of
    /// `source_dir` are copied, not moved, and the completion marker is
    /// written only after every file is in place.
    pub fn cache_dir(
        &self,
        source_dir: &Path,
        tool: &str,
        version: &str,
        arch: Option<&str>,
    ) -> Result<PathBuf> {
        validate_tool_name(tool)?;
        validate_version(version)?;
        let arch = resolve_arch(arch);
        tracing::info!("Caching tool: {} {} {}", tool, version, arch);
        tracing::debug!("source dir: {}", source_dir.display());

        if !source_dir.is_dir() {
            return Err(ToolCacheError::validation("sourceDir is not a directory"));
        }

        let dest_path = self.create_tool_path(tool, version, &arch)?;
        for entry in fs::read_dir(source_dir)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dest_path.join(entry.file_name()))?;
        }

        self.complete_tool_path(&dest_path)?;
        Ok(dest_path)
    }

    /// Caches a single file into the tool cache as `target_file_name` and
    /// returns the containing folder.
    pub fn cache_file(
        &self,
        source_file: &Path,
        target_file_name: &str,
        tool: &str,
        version: &str,
        arch: Option<&str>,
    ) -> Result<PathBuf> {
        validate_tool_name(tool)?;
        validate_version(version)?;
        if target_file_name.is_empty()
            || target_file_name.contains(['/', '\\'])
            || target_file_name == "."
            || target_file_name == ".."
        {
            return Err(ToolCacheError::validation(format!(
                "Invalid target file name '{}'",
                target_file_name
            )));
        }
        let arch = resolve_arch(arch);
        tracing::info!("Caching tool: {} {} {}", tool, version, arch);
        tracing::debug!("source file: {}", source_file.display());

        if !source_file.is_file() {
            return Err(ToolCacheError::validation("sourceFile is not a file"));
        }

        let dest_folder = self.create_tool_path(tool, version, &arch)?;
        let dest_path = dest_folder.join(target_file_name);
        tracing::debug!("destination file {}", dest_path.display());
        fs::copy(source_file, &dest_path)?;

        self.complete_tool_path(&dest_folder)?;
        Ok(dest_folder)
    }

    /// Every completed install under the cache root, ordered by tool name and
    /// then version.
    pub fn list_entries(&self) -> Result<Vec<ToolCacheEntry>> {
        let mut entries = Vec::new();
        if !self.root.is_dir() {
            return Ok(entries);
        }

        for tool_dir in read_subdirs(&self.root)? {
            let tool = file_name_string(&tool_dir);
            for version_dir in read_subdirs(&tool_dir)? {
                let version = file_name_string(&version_dir);
                for arch_dir in read_subdirs(&version_dir)? {
                    let marker = marker_path(&arch_dir);
                    let Ok(metadata) = fs::metadata(&marker) else {
                        continue;
                    };
                    entries.push(ToolCacheEntry {
                        tool: tool.clone(),
                        version: version.clone(),
                        arch: file_name_string(&arch_dir),
                        completed_at: metadata.modified().ok().map(DateTime::<Utc>::from),
                        path: arch_dir,
                    });
                }
            }
        }

        entries.sort_by(|a, b| {
            let by_version = match (
                semver::Version::parse(&a.version),
                semver::Version::parse(&b.version),
            ) {
                (Ok(a_ver), Ok(b_ver)) => a_ver.cmp(&b_ver),
                _ => a.version.cmp(&b.version),
            };
            a.tool
                .cmp(&b.tool)
                .then(by_version)
                .then_with(|| a.arch.cmp(&b.arch))
        });
        Ok(entries)
    }

    fn create_tool_path(&self, tool: &str, version: &str, arch: &str) -> Result<PathBuf> {
        let folder_path = self.tool_path(tool, version, arch);
        tracing::debug!("destination {}", folder_path.display());

        let marker = marker_path(&folder_path);
        remove_if_exists(&folder_path)?;
        remove_if_exists(&marker)?;
        fs::create_dir_all(&folder_path)?;
        Ok(folder_path)
    }

    fn complete_tool_path(&self, folder_path: &Path) -> Result<()> {
        fs::write(marker_path(folder_path), "")?;
        tracing::debug!("finished caching tool");
        Ok(())
    }
}

/// `<path>.complete`
pub fn marker_path(path: &Path) -> PathBuf {
    let mut marker: OsString = path.as_os_str().to_owned();
    marker.push(COMPLETE_MARKER_SUFFIX);
    PathBuf::from(marker)
}

/// An entry is usable only when its directory and marker both exist.
pub fn is_complete(path: &Path) -> bool {
    path.is_dir() && marker_path(path).exists()
}

fn resolve_arch(arch: Option<&str>) -> String {
    match arch {
        Some(arch) if !arch.is_empty() => arch.to_string(),
        _ => host_arch(),
    }
}

fn validate_tool_name(tool: &str) -> Result<()> {
    if tool.trim().is_empty() {
        return Err(ToolCacheError::validation("toolName parameter is required"));
    }
    if tool.contains(['/', '\\']) || tool == "." || tool == ".." {
        return Err(ToolCacheError::validation(format!(
            "Invalid tool name '{}'",
            tool
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.trim().is_empty() {
        return Err(ToolCacheError::validation("version parameter is required"));
    }
    if version.contains(['/', '\\']) || version == "." || version == ".." {
        return Err(ToolCacheError::validation(format!(
            "Invalid version '{}'",
            version
        )));
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn copy_recursive(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            ToolCacheError::Io(
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("filesystem loop while copying")),
            )
        })?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| ToolCacheError::Io(std::io::Error::other(e)))?;
        let target = if relative.as_os_str().is_empty() {
            dest.to_path_buf()
        } else {
            dest.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(source)?;
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, target: &Path) -> Result<()> {
    if source.is_dir() {
        copy_recursive(&fs::canonicalize(source)?, target)
    } else {
        fs::copy(source, target)?;
        Ok(())
    }
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ToolCacheStore) {
        let dir = TempDir::new().unwrap();
        let store = ToolCacheStore::new(dir.path().join("cache"));
        (dir, store)
    }

    fn staged_dir(parent: &Path, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = parent.join(name);
        for (path, content) in files {
            let file = dir.join(path);
            fs::create_dir_all(file.parent().unwrap()).unwrap();
            fs::write(file, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_marker_path_appends_suffix() {
        let marker = marker_path(Path::new("/cache/node/8.9.1/x64"));
        assert_eq!(marker, PathBuf::from("/cache/node/8.9.1/x64.complete"));
    }

    #[test]
    fn test_tool_path_cleans_version() {
        let store = ToolCacheStore::new("/cache");
        assert_eq!(
            store.tool_path("node", "v8.9.1", "x64"),
            PathBuf::from("/cache/node/8.9.1/x64")
        );
        assert_eq!(
            store.tool_path("go", "1.21", "x64"),
            PathBuf::from("/cache/go/1.21/x64")
        );
    }

    #[test]
    fn test_cache_dir_and_find() {
        let (dir, store) = store();
        let source = staged_dir(
            dir.path(),
            "src",
            &[("bin/node", "#!/bin/sh"), ("README.md", "node")],
        );

        let path = store.cache_dir(&source, "node", "8.9.1", Some("x64")).unwrap();
        assert_eq!(path, store.root().join("node").join("8.9.1").join("x64"));
        assert!(path.join("bin").join("node").is_file());
        assert!(marker_path(&path).is_file());
        assert_eq!(fs::read(marker_path(&path)).unwrap().len(), 0);

        let found = store.find_local_tool("node", "8.9.1", Some("x64")).unwrap();
        assert_eq!(found, Some(path.clone()));
        let found = store.find_local_tool("node", "8.x", Some("x64")).unwrap();
        assert_eq!(found, Some(path));
        assert_eq!(store.find_local_tool("node", "8.9.1", Some("arm64")).unwrap(), None);
    }

    #[test]
    fn test_cache_dir_replaces_previous_contents() {
        let (dir, store) = store();
        let first = staged_dir(dir.path(), "first", &[("old.txt", "1")]);
        let second = staged_dir(dir.path(), "second", &[("new.txt", "2")]);

        store.cache_dir(&first, "tool", "1.0.0", Some("x64")).unwrap();
        let path = store.cache_dir(&second, "tool", "1.0.0", Some("x64")).unwrap();

        assert!(path.join("new.txt").exists());
        assert!(!path.join("old.txt").exists());
    }

    #[test]
    fn test_cache_dir_rejects_non_directory() {
        let (dir, store) = store();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let err = store.cache_dir(&file, "tool", "1.0.0", None).unwrap_err();
        assert_eq!(err.to_string(), "sourceDir is not a directory");
    }

    #[test]
    fn test_cache_file_rejects_directory() {
        let (dir, store) = store();
        let err = store
            .cache_file(dir.path(), "tool", "tool", "1.0.0", None)
            .unwrap_err();
        assert_eq!(err.to_string(), "sourceFile is not a file");
    }

    #[test]
    fn test_cache_file_rejects_bad_target_names() {
        let (dir, store) = store();
        let file = dir.path().join("payload");
        fs::write(&file, "bin").unwrap();

        for name in ["", ".", "..", "bin/tool", "bin\\tool"] {
            let err = store
                .cache_file(&file, name, "tool", "1.0.0", Some("x64"))
                .unwrap_err();
            assert!(
                matches!(err, ToolCacheError::Validation(_)),
                "{:?} was accepted",
                name
            );
        }
        assert!(!store.tool_path("tool", "1.0.0", "x64").exists());
    }

    #[test]
    fn test_partial_install_is_ignored() {
        let (_dir, store) = store();
        let partial = store.tool_path("tool", "2.0.0", "x64");
        fs::create_dir_all(&partial).unwrap();
        fs::write(partial.join("half-written"), "x").unwrap();

        assert!(store
            .find_local_tool_versions("tool", Some("x64"))
            .unwrap()
            .is_empty());
        assert_eq!(store.find_local_tool("tool", "2.0.0", Some("x64")).unwrap(), None);
        assert!(store.list_entries().unwrap().is_empty());
    }

    #[test]
    fn test_find_local_tool_versions_skips_non_versions() {
        let (dir, store) = store();
        let file = dir.path().join("tool-bin");
        fs::write(&file, "bin").unwrap();
        store.cache_file(&file, "tool", "tool", "1.1.0", Some("x64")).unwrap();
        store.cache_file(&file, "tool", "tool", "1.2.0", Some("x64")).unwrap();
        store.cache_file(&file, "tool", "tool", "nightly", Some("x64")).unwrap();

        let mut versions = store.find_local_tool_versions("tool", Some("x64")).unwrap();
        versions.sort();
        assert_eq!(versions, vec!["1.1.0", "1.2.0"]);
        assert_eq!(
            evaluate_versions(&versions, "1.x").as_deref(),
            Some("1.2.0")
        );
    }

    #[test]
    fn test_missing_tool_directory_has_no_versions() {
        let (_dir, store) = store();
        assert!(store.find_local_tool_versions("absent", None).unwrap().is_empty());
        assert_eq!(store.find_local_tool("absent", "1.x", None).unwrap(), None);
    }

    #[test]
    fn test_validation_errors() {
        let (_dir, store) = store();
        assert!(matches!(
            store.find_local_tool("", "1.0.0", None),
            Err(ToolCacheError::Validation(_))
        ));
        assert!(matches!(
            store.find_local_tool("tool", "", None),
            Err(ToolCacheError::Validation(_))
        ));
        assert!(matches!(
            store.find_local_tool("../escape", "1.0.0", None),
            Err(ToolCacheError::Validation(_))
        ));
    }

    #[test]
    fn test_list_entries_sorted() {
        let (dir, store) = store();
        let file = dir.path().join("bin");
        fs::write(&file, "bin").unwrap();
        store.cache_file(&file, "bin", "zig", "0.11.0", Some("x64")).unwrap();
        store.cache_file(&file, "bin", "node", "10.0.0", Some("x64")).unwrap();
        store.cache_file(&file, "bin", "node", "9.11.2", Some("x64")).unwrap();

        let entries = store.list_entries().unwrap();
        let keys: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.tool.as_str(), e.version.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![("node", "9.11.2"), ("node", "10.0.0"), ("zig", "0.11.0")]
        );
        assert!(entries.iter().all(|e| e.completed_at.is_some()));
    }

    #[cfg(unix)]
    #[test]
    fn test_cache_dir_preserves_symlinks_and_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, store) = store();
        let source = staged_dir(dir.path(), "src", &[("bin/tool-1.0", "#!/bin/sh")]);
        let exe = source.join("bin").join("tool-1.0");
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("tool-1.0", source.join("bin").join("tool")).unwrap();

        let path = store.cache_dir(&source, "tool", "1.0.0", Some("x64")).unwrap();
        let link = path.join("bin").join("tool");
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("tool-1.0"));
        let mode = fs::metadata(path.join("bin").join("tool-1.0"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
