//! CLI command definitions and handlers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::engine::{BatchRunner, Engine, ResultSink};
use crate::oracle::{OracleClient, SharedOracle, UciOracle};
use crate::predictor::ScoreThresholdPredictor;
use crate::sources::HttpArchiveSource;
use crate::store::{MemoryStore, PostgresStore, Store};

/// Continuous chess-analysis benchmark engine.
#[derive(Debug, Parser)]
#[command(name = "autobench", version, about)]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    command: Commands,
}

/// Shared collaborator flags.
#[derive(Debug, clap::Args)]
struct CollaboratorArgs {
    /// Path to the UCI engine binary.
    #[arg(long, env = "AUTOBENCH_ENGINE_BIN", default_value = "stockfish")]
    engine_bin: PathBuf,

    /// Archive endpoint URL; repeatable, or comma-separated via env.
    #[arg(
        long = "archive-endpoint",
        env = "AUTOBENCH_ARCHIVE_ENDPOINTS",
        value_delimiter = ','
    )]
    archive_endpoints: Vec<String>,

    /// PostgreSQL URL; omit to run against the in-memory store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the engine until interrupted.
    Run {
        #[command(flatten)]
        collaborators: CollaboratorArgs,
    },
    /// Run one batch for one pool, persist it, and exit.
    Once {
        /// Pool to run ("volume" or "deep").
        #[arg(long, default_value = "volume")]
        pool: String,

        #[command(flatten)]
        collaborators: CollaboratorArgs,
    },
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses CLI arguments and runs the selected command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Runs the selected command with pre-parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run { collaborators } => run_engine(collaborators).await,
        Commands::Once { pool, collaborators } => run_once(&pool, collaborators).await,
    }
}

async fn build_store(database_url: Option<&str>) -> anyhow::Result<Arc<dyn Store>> {
    match database_url {
        Some(url) => {
            let store = PostgresStore::connect(url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            info!("using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("no DATABASE_URL configured, results will not survive the process");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

fn build_source(endpoints: Vec<String>) -> anyhow::Result<HttpArchiveSource> {
    if endpoints.is_empty() {
        bail!("at least one --archive-endpoint (or AUTOBENCH_ARCHIVE_ENDPOINTS) is required");
    }
    HttpArchiveSource::new(endpoints).context("building archive client")
}

async fn run_engine(collaborators: CollaboratorArgs) -> anyhow::Result<()> {
    let mut config = EngineConfig::from_env().context("loading configuration")?;
    if let Some(url) = &collaborators.database_url {
        config = config.with_database_url(url.clone());
    }

    let store = build_store(config.database_url.as_deref()).await?;
    let source = build_source(collaborators.archive_endpoints)?;
    let oracle = UciOracle::new(&collaborators.engine_bin).with_option("Threads", "1");

    let engine = Engine::new(
        config,
        Box::new(oracle),
        Arc::new(source),
        Arc::new(ScoreThresholdPredictor::default()),
        store,
    )?;

    engine.start().await?;
    info!("engine running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for interrupt")?;
    info!("interrupt received, shutting down");

    engine.stop().await?;
    let state = engine.state();
    println!(
        "stopped after {} results ({} recoveries, generation {})",
        state.total_results(),
        state.recovery_count(),
        state.generation()
    );
    Ok(())
}

async fn run_once(pool_name: &str, collaborators: CollaboratorArgs) -> anyhow::Result<()> {
    let mut config = EngineConfig::from_env().context("loading configuration")?;
    if let Some(url) = &collaborators.database_url {
        config = config.with_database_url(url.clone());
    }
    let pool = config
        .pool(pool_name)
        .with_context(|| format!("unknown pool '{}'", pool_name))?
        .clone();

    let store = build_store(config.database_url.as_deref()).await?;
    let source = build_source(collaborators.archive_endpoints)?;

    let mut oracle = UciOracle::new(&collaborators.engine_bin).with_option("Threads", "1");
    tokio::time::timeout(config.warmup_timeout, oracle.warm_up())
        .await
        .context("evaluator warm-up timed out")?
        .context("evaluator warm-up failed")?;

    let oracle: SharedOracle = Arc::new(Mutex::new(Box::new(oracle) as Box<dyn OracleClient>));
    let sink = ResultSink::new(
        Arc::clone(&store),
        config.persist_chunk_size,
        config.known_ids_page_size,
    );
    let runner = BatchRunner::new(
        Arc::new(source),
        oracle,
        Arc::new(ScoreThresholdPredictor::default()),
        sink.clone(),
        config.overfetch_factor,
        config.min_cut_plies,
        config.rng_seed,
    );

    let records = runner.run_batch(&pool, 1, None).await?;
    let header = sink.persist(&records, &pool.name, 1).await?;

    match header {
        Some(header) => println!(
            "pool {}: {} results persisted (oracle {:.1}%, local {:.1}%)",
            pool.name,
            header.total,
            header.oracle_accuracy() * 100.0,
            header.local_accuracy() * 100.0
        ),
        None => println!("pool {}: nothing to persist", pool.name),
    }
    Ok(())
}
