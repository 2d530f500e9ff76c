//! marketplace-sync: replay push captures through the sync engine
//!
//! Seeds feed caches from a JSON snapshot, feeds a JSON-lines capture of
//! push messages (either channel shape) through the reconciler, and prints
//! the resulting caches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use marketplace_sync::{Config, FeedKey, Job, RestBackend, SyncEngine, SystemClock};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "marketplace-sync")]
#[command(about = "Feed cache and negotiation engine for a jobs marketplace")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "marketplace-sync.toml")]
    config: PathBuf,

    /// Backend base URL (overrides config file)
    #[arg(long, env = "MARKETPLACE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Replay push messages and print the resulting feed caches
    Replay {
        /// JSON-lines file, one push message per line
        #[arg(long)]
        events: PathBuf,

        /// Session viewer
        #[arg(long)]
        viewer: Option<String>,

        /// JSON object mapping feed keys (e.g. "HOME:ALL") to job lists
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("marketplace_sync=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = Config::load(&cli.config)?;
    config.apply_env();
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }
    config.validate()?;

    match cli.command {
        Command::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Command::Replay {
            events,
            viewer,
            seed,
        } => {
            let backend = Arc::new(RestBackend::new(&config.backend)?);
            let engine = SyncEngine::new(config.sync.clone(), backend, Arc::new(SystemClock));
            if let Some(viewer) = viewer {
                engine.switch_viewer(viewer.as_str().into());
            }
            if let Some(seed) = seed {
                seed_feeds(&engine, &seed)?;
            }
            replay(&engine, &events).await?;

            let feeds: BTreeMap<String, _> = engine
                .store()
                .keys()
                .into_iter()
                .filter_map(|key| engine.use_feed(key).map(|entry| (key.to_string(), entry)))
                .collect();
            println!("{}", serde_json::to_string_pretty(&feeds)?);
        }
    }

    Ok(())
}

fn seed_feeds(engine: &SyncEngine, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed file {}", path.display()))?;
    let seed: BTreeMap<String, Vec<Job>> = serde_json::from_str(&content)?;

    for (name, jobs) in seed {
        let Some(key) = FeedKey::parse(&name) else {
            warn!(feed = %name, "Unknown feed key in seed file, skipping");
            continue;
        };
        let count = jobs.len();
        engine.store().write(key, jobs, false, count as u32);
        info!(feed = %key, jobs = count, "Seeded feed");
    }
    Ok(())
}

async fn replay(engine: &SyncEngine, path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading events file {}", path.display()))?;

    let (tx, rx) = mpsc::channel::<Value>(256);
    let listener = tokio::spawn(engine.push_listener().run(rx));

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(message) => tx.send(message).await?,
            Err(e) => warn!(line = line_no + 1, error = %e, "Skipping unparsable line"),
        }
    }
    drop(tx);

    let stats = listener.await?;
    info!(
        received = stats.received,
        applied = stats.applied,
        ignored = stats.ignored,
        malformed = stats.malformed,
        "Replay finished"
    );
    Ok(())
}
