use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use qbrain_core::Topology;
use qbrain_store::{KeyValueStore, SharedStore, StoreConfig};
use qbrain_units::{Network, NetworkConfig};

#[derive(Parser)]
#[command(name = "qbrain", about = "Networks of periodic perception units")]
struct Cli {
    /// SQLite store file (overrides QBRAIN_DB and the network file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and run a network until Ctrl-C or SIGTERM
    Run {
        /// Network description (TOML)
        network: PathBuf,

        /// Stop on its own after this many seconds
        #[arg(long = "for", value_name = "SECS")]
        run_for: Option<f64>,
    },

    /// Print every key and value in the store
    Status,

    /// Print the unit graph reconstructed from the store
    Graph {
        /// Emit the graph as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete every key in the store
    Flush,
}

/// `--db`, then `QBRAIN_DB`.
fn db_override(cli: &Cli) -> Option<PathBuf> {
    cli.db
        .clone()
        .or_else(|| std::env::var_os("QBRAIN_DB").map(PathBuf::from))
}

fn open_store(config: &StoreConfig) -> Result<SharedStore> {
    config
        .open()
        .with_context(|| format!("failed to open store at {}", config.db_path().display()))
}

fn cli_store(cli: &Cli) -> Result<SharedStore> {
    let config = db_override(cli)
        .map(StoreConfig::sqlite)
        .unwrap_or_default();
    open_store(&config)
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Run { network, run_for } => cmd_run(&cli, network, *run_for).await,
        Commands::Status => cmd_status(&cli),
        Commands::Graph { json } => cmd_graph(&cli, *json),
        Commands::Flush => cmd_flush(&cli),
    }
}

fn load_network(path: &Path) -> Result<NetworkConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("invalid network file {}", path.display()))
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term =
            signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r.context("failed to listen for Ctrl-C")?,
            _ = term.recv() => tracing::info!("received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    Ok(())
}

async fn cmd_run(cli: &Cli, path: &Path, run_for: Option<f64>) -> Result<()> {
    let mut config = load_network(path)?;
    if let Some(db) = db_override(cli) {
        config.store = StoreConfig::sqlite(db);
    }
    let limit = run_for
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("--for must be a non-negative number of seconds")?;

    let store = open_store(&config.store)?;
    let network = Network::build(&config, store).context("failed to build network")?;

    if let Err(e) = network.start() {
        // units already started must not leave keys behind
        network.stop().await.context("failed to stop network")?;
        return Err(e).context("failed to start network");
    }
    for unit in network.sensors() {
        println!("started {} as {} ({})", unit.name(), unit.id(), unit.class_name());
    }
    for unit in network.qunits() {
        println!("started {} as {} ({})", unit.name(), unit.id(), unit.class_name());
    }

    let waited = match limit {
        Some(limit) => tokio::select! {
            _ = tokio::time::sleep(limit) => Ok(()),
            r = shutdown_signal() => r,
        },
        None => shutdown_signal().await,
    };

    tracing::info!("shutting down network");
    network.stop().await.context("failed to stop network")?;
    waited?;
    println!("stopped");
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let store = cli_store(cli)?;
    let status = store.status().context("failed to read store")?;
    if status.is_empty() {
        println!("(store is empty)");
    }
    for (key, value) in &status {
        println!("{key}: {value}");
    }
    Ok(())
}

fn cmd_graph(cli: &Cli, json: bool) -> Result<()> {
    let store = cli_store(cli)?;
    let status = store.status().context("failed to read store")?;
    let topology = Topology::from_status(&status);
    if json {
        let rendered =
            serde_json::to_string_pretty(&topology).context("failed to serialize graph")?;
        println!("{rendered}");
        return Ok(());
    }
    if topology.is_empty() {
        println!("(no units)");
        return Ok(());
    }

    for node in topology.nodes() {
        println!(
            "{} [{}] output={} state={}",
            node.id,
            node.class.as_deref().unwrap_or("?"),
            node.output.as_deref().unwrap_or("-"),
            node.state.as_deref().unwrap_or("-"),
        );
    }
    for edge in topology.edges() {
        println!(
            "{} -> {} (dim {}) {}",
            edge.from,
            edge.to,
            edge.dim,
            edge.output.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

fn cmd_flush(cli: &Cli) -> Result<()> {
    let store = cli_store(cli)?;
    let removed = store.flush().context("failed to flush store")?;
    println!("flushed {removed} keys");
    Ok(())
}
