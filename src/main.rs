mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, Commands, ConfigAction, OutputFormat};
use console::style;
use std::path::Path;
use toolcache::config::{get_settings_file_path, ToolCacheConfig};
use toolcache::{
    clean_version, evaluate_versions, is_explicit_version, AcquireRequest, AuthHandler,
    DownloadOptions, ExecutionContext, ToolCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli)?;

    match cli.command {
        Commands::Version => {
            println!("toolcache v{}", env!("CARGO_PKG_VERSION"));
        }

        Commands::IsExplicit { version } => {
            println!("{}", is_explicit_version(&version));
        }

        Commands::Clean { version } => match clean_version(&version) {
            Some(cleaned) => println!("{}", cleaned),
            None => {
                tracing::error!("'{}' is not a valid version", version);
                std::process::exit(1);
            }
        },

        Commands::Evaluate {
            version_spec,
            versions,
        } => match evaluate_versions(&versions, &version_spec) {
            Some(version) => println!("{}", version),
            None => {
                tracing::error!("No version satisfies '{}'", version_spec);
                std::process::exit(1);
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                let config = ToolCacheConfig::from_env()?;
                let output = match format {
                    OutputFormat::Json => serde_json::to_string_pretty(&config)?,
                    OutputFormat::Yaml => serde_yaml::to_string(&config)?,
                };
                println!("{}", output);
            }
            ConfigAction::Path => match get_settings_file_path() {
                Some(path) => println!("{}", path.display()),
                None => {
                    tracing::error!("Could not determine the settings file location");
                    std::process::exit(1);
                }
            },
        },

        Commands::Find {
            tool,
            version_spec,
            arch,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            match tool_cache.find_local_tool(&tool, &version_spec, arch.as_deref())? {
                Some(path) => println!("{}", path.display()),
                None => {
                    tracing::error!("{} {} is not in the tool cache", tool, version_spec);
                    std::process::exit(1);
                }
            }
        }

        Commands::Versions { tool, arch } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            for version in tool_cache.find_local_tool_versions(&tool, arch.as_deref())? {
                println!("{}", version);
            }
        }

        Commands::List => list_cached_tools(&open_tool_cache(cli.quiet)?)?,

        Commands::Download {
            url,
            file,
            headers,
            token,
            no_retry,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let mut options = DownloadOptions::default();
            if let Some(file) = file {
                options = options.with_file_name(file);
            }
            for header in headers {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| anyhow!("Invalid header '{}'. Use 'Name: value'.", header))?;
                options = options.with_header(name.trim(), value.trim());
            }
            if let Some(token) = token {
                options = options.with_auth(AuthHandler::Bearer { token });
            }

            let path = if no_retry {
                tool_cache.download_tool(&url, &options).await?
            } else {
                tool_cache.download_tool_with_retries(&url, &options).await?
            };
            println!("{}", path.display());
        }

        Commands::Extract {
            file,
            dest,
            seven_zip,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let path = match seven_zip {
                Some(tool) => {
                    tool_cache
                        .extract_7z(&file, dest.as_deref(), Some(&tool))
                        .await?
                }
                None => tool_cache.extract_archive(&file, dest.as_deref()).await?,
            };
            println!("{}", path.display());
        }

        Commands::CacheDir {
            source_dir,
            tool,
            version,
            arch,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let path = tool_cache.cache_dir(&source_dir, &tool, &version, arch.as_deref())?;
            println!("{}", path.display());
        }

        Commands::CacheFile {
            source_file,
            target_file_name,
            tool,
            version,
            arch,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let path = tool_cache.cache_file(
                &source_file,
                &target_file_name,
                &tool,
                &version,
                arch.as_deref(),
            )?;
            println!("{}", path.display());
        }

        Commands::PrependPath { dir } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let mut context = ExecutionContext::from_env();
            tool_cache.prepend_path(&mut context, &dir)?;
        }

        Commands::Scrape { url, pattern } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            for version in tool_cache.scrape(&url, &pattern).await? {
                println!("{}", version);
            }
        }

        Commands::Install {
            tool,
            version_spec,
            url_template,
            arch,
            scrape_url,
            scrape_pattern,
            bin,
            keep_root_folder,
        } => {
            let tool_cache = open_tool_cache(cli.quiet)?;
            let mut request = AcquireRequest::new(&tool, &version_spec, url_template)
                .with_keep_root_folder(keep_root_folder);
            if let Some(arch) = arch {
                request = request.with_arch(arch);
            }
            if let (Some(url), Some(pattern)) = (scrape_url, scrape_pattern) {
                request = request.with_scrape(url, pattern);
            }

            let path = tool_cache
                .acquire(&request)
                .await
                .with_context(|| format!("Failed to install {} {}", tool, version_spec))?;
            let tool_path = match bin {
                Some(bin) => path.join(bin),
                None => path,
            };

            let mut context = ExecutionContext::from_env();
            tool_cache.prepend_path(&mut context, &tool_path)?;
        }
    }

    Ok(())
}

fn open_tool_cache(quiet: bool) -> Result<ToolCache> {
    let mut config = ToolCacheConfig::from_env()?;
    config.settings.show_progress |= !quiet && console::Term::stderr().is_term();
    Ok(ToolCache::new(config)?)
}

fn setup_logging(cli: &Cli) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.quiet {
        "error"
    } else if cli.verbose == 0 {
        "warn"
    } else if cli.verbose == 1 {
        "info"
    } else {
        "debug"
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries results and agent directives
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .init();

    Ok(())
}

fn list_cached_tools(tool_cache: &ToolCache) -> Result<()> {
    let entries = tool_cache.list_entries()?;
    let root = tool_cache.store().root();
    println!("--- Cached Tools ({}) ---", root.display());
    if entries.is_empty() {
        println!("  No tools cached yet.");
        return Ok(());
    }

    for entry in entries {
        let completed = entry
            .completed_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  - {} {} [{}]",
            style(&entry.tool).bold(),
            style(&entry.version).green(),
            entry.arch
        );
        println!("    Path:      {}", display_relative(&entry.path, root));
        println!("    Completed: {}\n", completed);
    }
    Ok(())
}

fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| format!("<root>/{}", p.display()))
        .unwrap_or_else(|_| path.display().to_string())
}
