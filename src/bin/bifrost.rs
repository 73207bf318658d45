//! bifrost: audio stream resolver CLI
//!
//! Resolves identifiers through the full cascade and manages the local
//! cache and instance directory.

use std::path::PathBuf;
use std::process::ExitCode;

use bifrost::{Config, InstanceDirectory, ResultCache};
use clap::{Parser, Subcommand};
use serde::Serialize;

/// Bifrost CLI
#[derive(Parser)]
#[command(name = "bifrost")]
#[command(version = bifrost::PKG_VERSION, long_version = bifrost::version_string())]
#[command(about = "Resilient multi-source audio stream resolver")]
struct Args {
    /// Config file (default: ~/.bifrost/config.toml, then /etc/bifrost/config.toml)
    #[arg(short, long, env = "BIFROST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an identifier to an audio stream URL
    Resolve {
        /// Video identifier (11-character id) or any opaque track reference
        id: String,
        /// Track title, used for search when the id is not a video id
        #[arg(long)]
        title: Option<String>,
        /// Track artist, used for search together with the title
        #[arg(long)]
        artist: Option<String>,
        /// Also print resolver, cache and provider statistics
        #[arg(long)]
        stats: bool,
    },

    /// Refresh the instance directory and print what was found
    Discover,

    /// Inspect or maintain the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print cache statistics
    Stats,
    /// Drop expired entries from both namespaces
    Cleanup,
    /// Remove every entry
    Clear,
}

#[derive(Serialize)]
struct Cleanup {
    urls_removed: usize,
    metadata_removed: usize,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Resolve {
            id,
            title,
            artist,
            stats,
        } => {
            let resolver = config.builder().build()?;
            let resolution = resolver
                .resolve(&id, title.as_deref(), artist.as_deref())
                .await;
            print_json(&resolution)?;
            if stats {
                print_json(&resolver.report())?;
            }
            if !resolution.is_found() {
                return Ok(ExitCode::FAILURE);
            }
        }

        Command::Discover => {
            let directory = InstanceDirectory::new(config.discovery_config())?;
            directory.refresh().await;
            print_json(&directory.stats())?;
        }

        Command::Cache { action } => {
            let cache = ResultCache::new(&config.cache_config());
            match action {
                CacheAction::Stats => print_json(&cache.stats())?,
                CacheAction::Cleanup => {
                    let (urls_removed, metadata_removed) = cache.cleanup_expired();
                    print_json(&Cleanup {
                        urls_removed,
                        metadata_removed,
                    })?;
                }
                CacheAction::Clear => {
                    cache.clear_all();
                    println!("cache cleared");
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize>(value: &T) -> serde_json::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
