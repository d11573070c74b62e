use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "toolcache")]
#[command(about = "Download, extract and cache tool versions for CI jobs")]
#[command(version)]
pub struct Cli {
    /// Increase verbosity (use multiple times for more detail)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Reduce output to errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the cache path of a tool matching a version or range
    Find {
        /// Tool name (e.g., 'node')
        tool: String,
        /// Exact version or range (e.g., '8.9.1', '8.x', '>=8 <10')
        version_spec: String,
        /// Architecture (defaults to the host's)
        #[arg(long)]
        arch: Option<String>,
    },

    /// List the cached versions of a tool
    Versions {
        tool: String,
        #[arg(long)]
        arch: Option<String>,
    },

    /// List every completed install in the cache
    List,

    /// Pick the highest version satisfying a range
    Evaluate {
        /// Range to satisfy (e.g., '1.x')
        version_spec: String,
        /// Candidate versions
        #[arg(required = true)]
        versions: Vec<String>,
    },

    /// Report whether a version is exact rather than a range
    IsExplicit { version: String },

    /// Normalize a version string (e.g., 'v1.2.3' -> '1.2.3')
    Clean { version: String },

    /// Download a file into the temp directory
    Download {
        url: String,
        /// Destination file name, relative to the temp directory or absolute
        #[arg(long)]
        file: Option<PathBuf>,
        /// Extra request header in 'Name: value' form
        #[arg(long = "header")]
        headers: Vec<String>,
        /// Bearer token sent with the request
        #[arg(long, env = "TOOLCACHE_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Make a single attempt instead of retrying transient failures
        #[arg(long)]
        no_retry: bool,
    },

    /// Extract a .tar.*, .zip or .7z archive
    Extract {
        file: PathBuf,
        /// Destination directory (a fresh one under the temp directory if omitted)
        #[arg(long)]
        dest: Option<PathBuf>,
        /// 7-Zip executable to use instead of the bundled decoder
        #[arg(long)]
        seven_zip: Option<PathBuf>,
    },

    /// Copy a directory into the cache
    CacheDir {
        source_dir: PathBuf,
        tool: String,
        version: String,
        #[arg(long)]
        arch: Option<String>,
    },

    /// Copy a single file into the cache
    CacheFile {
        source_file: PathBuf,
        /// Name of the file inside the cache directory
        target_file_name: String,
        tool: String,
        version: String,
        #[arg(long)]
        arch: Option<String>,
    },

    /// Emit the agent directive that prepends a directory to PATH
    PrependPath { dir: PathBuf },

    /// Scrape version numbers from a web page
    Scrape {
        url: String,
        /// Regular expression matching one version (e.g., 'v\d+\.\d+\.\d+')
        pattern: String,
    },

    /// Resolve, download and cache a tool, then prepend it to PATH
    #[command(
        after_help = "Examples:\n  toolcache install node 8.9.1 'https://nodejs.org/dist/v{version}/node-v{version}-linux-{arch}.tar.gz'\n  toolcache install node 8.x 'https://nodejs.org/dist/v{version}/node-v{version}-linux-{arch}.tar.gz' \\\n      --scrape-url https://nodejs.org/dist/ --scrape-pattern 'v\\d+\\.\\d+\\.\\d+'"
    )]
    Install {
        tool: String,
        version_spec: String,
        /// Download URL with {version} and {arch} placeholders
        url_template: String,
        #[arg(long)]
        arch: Option<String>,
        /// Page listing available versions, needed for ranges
        #[arg(long, requires = "scrape_pattern")]
        scrape_url: Option<String>,
        #[arg(long, requires = "scrape_url")]
        scrape_pattern: Option<String>,
        /// Subdirectory of the cached tool to put on PATH (e.g., 'bin')
        #[arg(long)]
        bin: Option<PathBuf>,
        /// Cache the archive as extracted instead of stripping a single root folder
        #[arg(long)]
        keep_root_folder: bool,
    },

    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show the current version
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show full configuration
    Show {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Print the path of the settings file
    Path,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_install() {
        let cli = Cli::parse_from([
            "toolcache",
            "-vv",
            "install",
            "node",
            "8.x",
            "https://nodejs.org/dist/v{version}/node-v{version}-linux-{arch}.tar.gz",
            "--scrape-url",
            "https://nodejs.org/dist/",
            "--scrape-pattern",
            r"v\d+\.\d+\.\d+",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Install {
                tool,
                version_spec,
                scrape_url,
                keep_root_folder,
                ..
            } => {
                assert_eq!(tool, "node");
                assert_eq!(version_spec, "8.x");
                assert_eq!(scrape_url.as_deref(), Some("https://nodejs.org/dist/"));
                assert!(!keep_root_folder);
            }
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_parse_keep_root_folder() {
        let cli = Cli::parse_from([
            "toolcache",
            "install",
            "mytool",
            "1.2.0",
            "https://example.com/{version}.tar.gz",
            "--keep-root-folder",
        ]);
        match cli.command {
            Commands::Install {
                keep_root_folder, ..
            } => assert!(keep_root_folder),
            _ => panic!("expected install"),
        }
    }

    #[test]
    fn test_scrape_options_go_together() {
        let result = Cli::try_parse_from([
            "toolcache",
            "install",
            "node",
            "8.x",
            "https://example.com/{version}",
            "--scrape-url",
            "https://nodejs.org/dist/",
        ]);
        assert!(result.is_err());
    }
}
