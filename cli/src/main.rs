//! chainmirror CLI: mirror a contract's events into a relational store.
//!
//! Usage:
//! ```bash
//! chainmirror run    config/services/miner.json
//! chainmirror status config/services/miner.json --global config/global.json
//! chainmirror reset  config/services/miner.json
//! chainmirror info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use chainmirror_core::normalize::{DEFAULT_DISPLAY_DECIMALS, DEFAULT_SCALE_DECIMALS};
use chainmirror_core::{ReconnectSupervisor, Settings, SyncContext, MARGIN_BLOCKS, WINDOW_SIZE};
use chainmirror_evm::{AbiDecoder, EvmLedgerClient};
use chainmirror_storage::{Stores, Tables};

mod logging;

#[derive(Parser)]
#[command(
    name = "chainmirror",
    about = "Mirror smart-contract events into a relational store",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backfill, then follow the chain until Ctrl-C
    Run(ServiceArgs),
    /// Print the stored sync cursor
    Status(ServiceArgs),
    /// Delete the stored sync cursor; the next run starts from the deploy block
    Reset(ServiceArgs),
    /// Show built-in defaults
    Info,
}

#[derive(clap::Args)]
struct ServiceArgs {
    /// Path to the service config (JSON)
    service: PathBuf,
    /// Path to the global config (default: nearest `global.json` above the service file)
    #[arg(short, long)]
    global: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cmd_run(&args).await,
        Commands::Status(args) => cmd_status(&args).await,
        Commands::Reset(args) => cmd_reset(&args).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

/// The global config next to the service file's config directory.
///
/// Looks for `global.json` in each ancestor of the service file, falling back
/// to `config/global.json` in the working directory.
fn default_global_path(service: &Path) -> PathBuf {
    service
        .parent()
        .into_iter()
        .flat_map(Path::ancestors)
        .map(|dir| dir.join("global.json"))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from("config/global.json"))
}

fn load_settings(args: &ServiceArgs) -> Result<Settings> {
    let global = args
        .global
        .clone()
        .unwrap_or_else(|| default_global_path(&args.service));
    Settings::load(&args.service, &global).with_context(|| {
        format!(
            "loading {} with global config {}",
            args.service.display(),
            global.display()
        )
    })
}

async fn open_stores(settings: &Settings) -> Result<Stores> {
    let tables = Tables::from_config(&settings.service.database)?;
    chainmirror_storage::open(&settings.database, tables)
        .await
        .with_context(|| {
            format!(
                "opening database environment \"{}\"",
                settings.service.database.environment
            )
        })
}

async fn cmd_run(args: &ServiceArgs) -> Result<()> {
    let settings = load_settings(args)?;
    logging::init_tracing(&settings.log, settings.database.debug);

    let decoder = AbiDecoder::from_file(&settings.abi_path)
        .with_context(|| format!("loading ABI {}", settings.abi_path.display()))?;
    let whitelist = settings.service.whitelist();
    for kind in whitelist.iter() {
        if decoder.selector(kind).is_none() {
            bail!(
                "wanted event \"{kind}\" is not declared in {}",
                settings.abi_path.display()
            );
        }
    }

    let stores = open_stores(&settings).await?;
    let contract = &settings.service.contract;
    let ledger = EvmLedgerClient::connect(&settings.network.wss, &contract.address, decoder);

    info!(
        network = %settings.service.network_name,
        rpc = %settings.network.wss,
        service = %contract.name,
        address = %contract.address,
        database = %settings.service.database.environment,
        table = %settings.service.database.table_name,
        events = whitelist.len(),
        "chainmirror {} starting",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = SyncContext::new(
        settings.service.clone(),
        Arc::new(ledger),
        stores.events,
        stores.cursors,
    );
    let supervisor = ReconnectSupervisor::new(ctx);

    tokio::select! {
        result = supervisor.run() => result.context("sync stopped")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            info!("shutting down");
        }
    }
    Ok(())
}

async fn cmd_status(args: &ServiceArgs) -> Result<()> {
    let settings = load_settings(args)?;
    let stores = open_stores(&settings).await?;
    let service_id = settings.service.service_id();

    match stores.cursors.get_synced_block(&service_id).await? {
        Some(block) => println!("{service_id}: in sync until block {block}"),
        None => println!(
            "{service_id}: never synced (first run starts at deploy tx {})",
            settings.service.contract.deploy_tx
        ),
    }
    Ok(())
}

async fn cmd_reset(args: &ServiceArgs) -> Result<()> {
    let settings = load_settings(args)?;
    let stores = open_stores(&settings).await?;
    let service_id = settings.service.service_id();

    stores.cursors.reset(&service_id).await?;
    println!("{service_id}: cursor deleted");
    Ok(())
}

fn cmd_info() {
    println!("ChainMirror v{}", env!("CARGO_PKG_VERSION"));
    println!("  Backfill window: {WINDOW_SIZE} blocks/query");
    println!("  Resume margin: {MARGIN_BLOCKS} blocks before the stored cursor");
    println!("  Amount scaling: {DEFAULT_SCALE_DECIMALS} decimals, shown with {DEFAULT_DISPLAY_DECIMALS}");
    println!("  Storage backends: memory, SQLite, MySQL (by database URL scheme)");
    println!("  Ledger: EVM over WebSocket JSON-RPC");
}
