mod config;

use crate::config::PagecacheConfig;
use anyhow::Context;
use chrono::{SecondsFormat, TimeDelta, Utc};
use clap::{Args, Parser, Subcommand};
use pagecache::cache::dispatcher::CacheDispatcher;
use pagecache::cache::{ArtifactMetadata, CacheBackend, CacheError, CacheKey};
use pagecache::util::close::Close;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const NOT_FOUND: u8 = 2;

/// Access cached renderings of documents.
///
/// Artifacts are addressed by a GUID together with a base name and file type. Depending on the
/// configuration they are kept in a local directory or in an S3-compatible object store.
///
/// Exits with status 2 if the requested artifact or information is not available.
#[derive(Parser)]
#[command(version)]
struct CliOpts {
    /// Configuration file to load (TOML).
    ///
    /// Without this option, /etc/pagecache/config.toml is loaded if it exists. Settings can also
    /// be given as environment variables, e.g. PAGECACHE_CACHE__PATH.
    #[arg(short, long, env = "PAGECACHE_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether an artifact is cached.
    Exists {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Write a cached artifact to a file or stdout.
    Get {
        #[command(flatten)]
        key: KeyArgs,

        /// File to write to instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Store a file as artifact, replacing any previously cached one.
    Put {
        #[command(flatten)]
        key: KeyArgs,

        /// Display name of the artifact; determines its content type. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,

        /// File to store.
        file: PathBuf,
    },

    /// Print when a cached artifact was last modified (RFC 3339).
    LastModified {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Print the local path of an artifact, if the backend keeps artifacts in local files.
    Path {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// List the auxiliary resources of an artifact.
    Resources {
        #[command(flatten)]
        key: KeyArgs,
    },

    /// Remove artifacts that were not modified within the given duration.
    Purge {
        /// Maximum age of artifacts to keep, e.g. "7days".
        #[arg(long)]
        older_than: humantime::Duration,
    },
}

/// Identifies an artifact in the cache.
#[derive(Args)]
struct KeyArgs {
    /// Unique identifier of the artifact.
    #[arg(long)]
    guid: String,

    /// Base name of the artifact, e.g. "page_1".
    #[arg(long)]
    base_name: String,

    /// File type (extension) of the artifact, e.g. "html".
    #[arg(long)]
    file_type: String,
}

impl KeyArgs {
    fn to_key(&self) -> CacheKey {
        CacheKey::new(&self.guid, &self.base_name, &self.file_type)
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn not_found(what: &str) -> ExitCode {
    eprintln!("{what}");
    ExitCode::from(NOT_FOUND)
}

fn main() -> Result<ExitCode, anyhow::Error> {
    init_logging();
    let cli_opts = CliOpts::parse();
    let config = PagecacheConfig::load(cli_opts.config.as_deref())
        .context("Could not load configuration")?;
    debug!(cache = ?config.cache, "loaded configuration");
    let cache = CacheDispatcher::from_config(&config.cache).context("Could not open cache")?;

    match cli_opts.command {
        Commands::Exists { key } => {
            let key = key.to_key();
            let exists = cache
                .exists(&key)
                .with_context(|| format!("Could not check cache for: {key}"))?;
            println!("{exists}");
            if !exists {
                return Ok(ExitCode::from(NOT_FOUND));
            }
        }
        Commands::Get { key, output } => {
            let key = key.to_key();
            let mut reader = match cache.open_read(&key) {
                Err(CacheError::NotFound { .. }) => {
                    return Ok(not_found("Artifact not found in cache."));
                }
                result => result.with_context(|| format!("Could not read: {key}"))?,
            };
            match output {
                Some(path) => {
                    let mut file = File::create(&path)
                        .with_context(|| format!("Could not create: {}", path.display()))?;
                    io::copy(&mut reader, &mut file)
                        .with_context(|| format!("Could not write: {}", path.display()))?;
                }
                None => {
                    io::copy(&mut reader, &mut io::stdout().lock())
                        .context("Could not write to stdout")?;
                }
            }
        }
        Commands::Put { key, name, file } => {
            let key = key.to_key();
            let mut source = File::open(&file)
                .with_context(|| format!("Could not open: {}", file.display()))?;
            let size = source
                .metadata()
                .with_context(|| format!("Could not access: {}", file.display()))?
                .len();
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| key.file_name()),
            };
            let mut writer = cache
                .open_write(&key, &ArtifactMetadata::new(name, size))
                .with_context(|| format!("Could not cache: {}", file.display()))?;
            io::copy(&mut source, &mut writer)
                .and_then(|_| writer.close())
                .with_context(|| format!("Could not cache: {}", file.display()))?;
        }
        Commands::LastModified { key } => match cache.last_modified(&key.to_key()) {
            Some(last_modified) => {
                println!("{}", last_modified.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            None => return Ok(not_found("Last modification time not available.")),
        },
        Commands::Path { key } => match cache.resolve_path(&key.to_key()) {
            Some(path) => println!("{}", path.display()),
            None => return Ok(not_found("Cache does not keep artifacts in local files.")),
        },
        Commands::Resources { key } => {
            let key = key.to_key();
            let resources = cache
                .resources(&key)
                .with_context(|| format!("Could not list resources of: {key}"))?;
            for resource in resources {
                println!(
                    "{}\t{}\t{}",
                    resource.name,
                    resource.size,
                    resource
                        .last_modified
                        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::Purge { older_than } => {
            let cutoff = TimeDelta::from_std(*older_than.as_ref())
                .ok()
                .and_then(|age| Utc::now().checked_sub_signed(age));
            match cutoff {
                Some(cutoff) => cache.purge(cutoff).context("Could not purge cache")?,
                None => debug!(%older_than, "no artifact can be older than that, nothing to purge"),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
