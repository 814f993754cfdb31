//! Operator CLI for depot package storage.

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use depot_core::{PackageName, StoreConfig};
use depot_registry::{AbortHandle, DownloadEvent, PackageStorage, RegistryDatabase, UploadEvent};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(about = "Operator CLI for depot package storage")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, env = "DEPOT_CONFIG", default_value = "config/depot.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List indexed package names
    Names,
    /// Add a package name to the index
    Add { name: String },
    /// Remove a package name from the index
    Remove { name: String },
    /// Print a package's metadata document
    Show { name: String },
    /// Upload a tarball
    Put {
        name: String,
        artifact: String,
        /// File to upload
        file: PathBuf,
    },
    /// Download a tarball
    Get {
        name: String,
        artifact: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete one file of a package
    Delete { name: String, artifact: String },
    /// Remove a package and everything stored under it
    Purge { name: String },
    /// Registry secret commands
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
    /// Check blob store and entity store health
    Health,
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Print the secret
    Get,
    /// Replace the secret
    Set { value: String },
}

/// Configuration file layout: store options live under `[store]`.
#[derive(Debug, Default, Deserialize)]
struct CliConfig {
    #[serde(default)]
    store: Option<StoreConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so `get` can stream a tarball to stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();

    let store = load_config(&config)?;
    let db = RegistryDatabase::from_config(store.as_ref())
        .await
        .context("failed to initialize package storage")?;

    match command {
        Commands::Names => {
            for name in db.get().await? {
                println!("{name}");
            }
        }
        Commands::Add { name } => {
            db.add(&package_name(&name)?).await?;
            println!("Added {name}");
        }
        Commands::Remove { name } => {
            db.remove(&package_name(&name)?)
                .await
                .with_context(|| format!("failed to remove {name}"))?;
            println!("Removed {name}");
        }
        Commands::Show { name } => {
            let storage = db.get_package_storage(package_name(&name)?);
            let document: Value = storage
                .read_package()
                .await
                .with_context(|| format!("failed to read {name}"))?;
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        Commands::Put {
            name,
            artifact,
            file,
        } => {
            let storage = db.get_package_storage(package_name(&name)?);
            let size = upload(&storage, &artifact, &file).await?;
            println!("Uploaded {name}/{artifact} ({size} bytes)");
        }
        Commands::Get {
            name,
            artifact,
            output,
        } => {
            let storage = db.get_package_storage(package_name(&name)?);
            download(&storage, &artifact, output.as_deref()).await?;
        }
        Commands::Delete { name, artifact } => {
            let storage = db.get_package_storage(package_name(&name)?);
            storage
                .delete_package(&artifact)
                .await
                .with_context(|| format!("failed to delete {name}/{artifact}"))?;
            println!("Deleted {name}/{artifact}");
        }
        Commands::Purge { name } => {
            let storage = db.get_package_storage(package_name(&name)?);
            storage
                .remove_package()
                .await
                .with_context(|| format!("failed to purge {name}"))?;
            println!("Purged {name}");
        }
        Commands::Secret { command } => match command {
            SecretCommands::Get => match db.get_secret().await? {
                Some(secret) => println!("{secret}"),
                None => bail!("no secret set"),
            },
            SecretCommands::Set { value } => {
                db.set_secret(&value).await?;
                println!("Secret updated");
            }
        },
        Commands::Health => {
            db.health_check().await?;
            println!("ok");
        }
    }

    Ok(())
}

/// Load `[store]` from the config file (if present) merged with
/// `DEPOT_`-prefixed environment variables.
fn load_config(path: &Path) -> Result<Option<StoreConfig>> {
    let mut figment = Figment::new();

    if path.exists() {
        info!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        debug!("No config file found at {}", path.display());
    }

    let config: CliConfig = figment
        .merge(Env::prefixed("DEPOT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    Ok(config.store)
}

fn package_name(name: &str) -> Result<PackageName> {
    PackageName::new(name).with_context(|| format!("invalid package name: {name:?}"))
}

/// Abort the transfer behind `handle` on Ctrl-C.
fn abort_on_interrupt(handle: AbortHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting transfer");
            handle.abort();
        }
    })
}

async fn upload(storage: &PackageStorage, artifact: &str, path: &Path) -> Result<u64> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut upload = storage.write_tarball(artifact);
    let interrupt = abort_on_interrupt(upload.abort_handle());

    let mut chunks = ReaderStream::new(file);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk.with_context(|| format!("failed to read {}", path.display()))?;
        // A rejected write means the upload already ended; its event says why
        if upload.write(chunk).await.is_err() {
            break;
        }
    }
    upload.done();

    let result = loop {
        match upload.next_event().await {
            Some(UploadEvent::Open) => debug!(artifact, "Upload opened"),
            Some(UploadEvent::Success) => break Ok(upload.bytes_transferred()),
            Some(UploadEvent::Error(e)) => {
                break Err(anyhow!(e).context(format!("failed to upload {artifact}")));
            }
            None => break Err(anyhow!("upload of {artifact} ended without a result")),
        }
    };
    interrupt.abort();
    result
}

async fn download(storage: &PackageStorage, artifact: &str, output: Option<&Path>) -> Result<()> {
    let mut download = storage.read_tarball(artifact);
    let interrupt = abort_on_interrupt(download.abort_handle());

    let mut sink: Option<Box<dyn AsyncWrite + Unpin + Send>> = None;
    let result = loop {
        match download.next_event().await {
            Some(DownloadEvent::Open) => match open_output(output).await {
                Ok(out) => sink = Some(out),
                Err(e) => {
                    download.abort();
                    break Err(e);
                }
            },
            Some(DownloadEvent::ContentLength(size)) => debug!(artifact, size, "Download opened"),
            Some(DownloadEvent::Data(chunk)) => {
                if let Some(out) = sink.as_mut()
                    && let Err(e) = out.write_all(&chunk).await
                {
                    download.abort();
                    break Err(anyhow!(e).context("failed to write tarball"));
                }
            }
            Some(DownloadEvent::End) => {
                if let Some(out) = sink.as_mut()
                    && let Err(e) = out.flush().await
                {
                    break Err(anyhow!(e).context("failed to write tarball"));
                }
                info!(artifact, bytes = download.bytes_transferred(), "Download complete");
                break Ok(());
            }
            Some(DownloadEvent::Error(e)) => {
                break Err(anyhow!(e).context(format!("failed to download {artifact}")));
            }
            None => break Err(anyhow!("download of {artifact} ended without a result")),
        }
    };
    interrupt.abort();
    result
}

async fn open_output(output: Option<&Path>) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    match output {
        Some(path) => {
            let file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}
