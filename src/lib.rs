//! Acquire pinned or range-resolved tool versions for CI jobs: resolve a
//! version, download it, extract it and keep it in a versioned on-disk cache.

pub mod cache;
pub mod config;
pub mod context;
pub mod download;
pub mod error;
pub mod extract;
pub mod platform;
pub mod tool_cache;
pub mod types;
pub mod version;

pub use cache::ToolCacheStore;
pub use config::{ToolCacheConfig, ToolCacheSettings};
pub use context::{ExecutionContext, WorkingDirectoryGuard};
pub use download::Downloader;
pub use error::{Result, ToolCacheError};
pub use extract::Extractor;
pub use tool_cache::{AcquireRequest, ScrapeSource, ToolCache};
pub use types::{ArchiveFormat, AuthHandler, DownloadOptions, RetryPolicy, ToolCacheEntry};
pub use version::{clean_version, evaluate_versions, is_explicit_version};
