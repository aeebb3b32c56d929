//! StakeIndex CLI — replay recorded chain events into a derived-entity store.
//!
//! # Commands
//! ```text
//! stakeindex replay --events <file.jsonl> [--config <cfg.json>] [--chain-state <state.json>] [--sqlite <path>]
//! stakeindex show   --sqlite <path> <kind> <id>
//! stakeindex info   [--config <cfg.json>]
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use stakeindex_core::{
    ChainQuery, EntityStore, EventProcessor, LogConfig, ProcessorStats, StakeIndexConfig,
    StaticQuery,
};
use stakeindex_storage::{MemoryStore, SqliteStore};

mod logging;
mod replay;

#[derive(Parser)]
#[command(
    name = "stakeindex",
    about = "Staking and rewards indexer — StakeIndex CLI",
    long_about = "
StakeIndex CLI: apply decoded staking contract events, in stream order, to a
store of derived entities (eras, delegations, indexers, rewards, projects,
plans, service agreements).

Log filtering follows the `log` section of the config file; --verbose forces
debug output.
",
    version
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON-lines file of decoded events
    Replay {
        /// Events file, one JSON event per line
        #[arg(long)]
        events: PathBuf,
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Recorded chain state used to answer chain queries
        #[arg(long)]
        chain_state: Option<PathBuf>,
        /// Persist to this SQLite database (default: in memory)
        #[arg(long)]
        sqlite: Option<String>,
    },

    /// Print one stored entity as JSON
    Show {
        /// SQLite database written by `replay`
        #[arg(long)]
        sqlite: String,
        /// Entity kind, e.g. delegation, indexer_reward
        kind: String,
        /// Entity id
        id: String,
    },

    /// Print the effective configuration
    Info {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            events,
            config,
            chain_state,
            sqlite,
        } => {
            let config = replay::load_config(config.as_deref())?;
            logging::init_tracing(&log_config(&config.log, cli.verbose));
            cmd_replay(config, &events, chain_state.as_deref(), sqlite.as_deref()).await
        }

        Commands::Show { sqlite, kind, id } => {
            logging::init_tracing(&log_config(&LogConfig::default(), cli.verbose));
            cmd_show(&sqlite, &kind, &id).await
        }

        Commands::Info { config } => {
            let config = replay::load_config(config.as_deref())?;
            cmd_info(&config)
        }
    }
}

fn log_config(base: &LogConfig, verbose: bool) -> LogConfig {
    let mut log = base.clone();
    if verbose {
        log.level = "debug".into();
    }
    log
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_replay(
    config: StakeIndexConfig,
    events: &Path,
    chain_state: Option<&Path>,
    sqlite: Option<&str>,
) -> Result<()> {
    let events = replay::load_events(events)?;
    let query = match chain_state {
        Some(path) => replay::load_chain_state(path)?,
        None => StaticQuery::new(),
    };
    let total = events.len();

    let stats = match sqlite {
        Some(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("opening SQLite store {path}"))?;
            run_replay(config, store, query, events).await?
        }
        None => run_replay(config, MemoryStore::new(), query, events).await?,
    };

    println!("Replayed {total} events");
    println!("  applied:    {}", stats.applied);
    println!("  skipped:    {}", stats.skipped);
    println!("  writes:     {}", stats.writes);
    match stats.last_block {
        Some(block) => println!("  last block: {block}"),
        None => println!("  last block: -"),
    }
    Ok(())
}

async fn run_replay<S, Q>(
    config: StakeIndexConfig,
    store: S,
    query: Q,
    events: Vec<stakeindex_core::ChainEvent>,
) -> Result<ProcessorStats>
where
    S: EntityStore,
    Q: ChainQuery,
{
    let mut processor = EventProcessor::new(config, store, query);
    match processor.run(futures::stream::iter(events)).await {
        Ok(stats) => Ok(stats),
        Err(e) => {
            let stats = processor.stats();
            Err(anyhow!(e)).with_context(|| {
                format!(
                    "replay stopped after {} applied events (last block {:?})",
                    stats.applied, stats.last_block
                )
            })
        }
    }
}

async fn cmd_show(sqlite: &str, kind: &str, id: &str) -> Result<()> {
    let store = SqliteStore::open(sqlite)
        .await
        .with_context(|| format!("opening SQLite store {sqlite}"))?;
    let body = store
        .get(kind, id)
        .await?
        .ok_or_else(|| anyhow!("no {kind} with id '{id}'"))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn cmd_info(config: &StakeIndexConfig) -> Result<()> {
    println!("StakeIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Storage backends: memory, SQLite");
    println!("  Effective configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
