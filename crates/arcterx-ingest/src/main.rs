//! ARCTERX Ingest - tail growing data files into PostgreSQL

use anyhow::{Context, Result};
use arcterx_common::logging::{init_logging, LogConfig, LogLevel};
use arcterx_common::resolve_path;
use arcterx_ingest::decode::{
    drifter::DRIFTER_FILE_PATTERN,
    position::{DEFAULT_SHIP_CLASS, DEFAULT_SHIP_NAME, POSITION_FILE_PATTERN},
    scs::SCS_FILE_PATTERN,
    sfmc::SFMC_FILE_PATTERN,
    DrifterDecoder, LineDecoder, PositionDecoder, ScsDecoder, SfmcDecoder,
};
use arcterx_ingest::{
    DebounceMode, IngestConfig, IngestCoordinator, OffsetStore, PgRecord, PgStore,
    PollingWatcher, Scheduler,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "arcterx-ingest")]
#[command(author, version, about = "Tail growing ARCTERX data files into PostgreSQL")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// PostgreSQL connection URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Seconds to wait after a change before reading the file
    #[arg(long, global = true)]
    settle_delay: Option<u64>,

    /// Debounce mode: fixed or sliding
    #[arg(long, global = true)]
    debounce: Option<DebounceMode>,

    /// Seconds between directory walks
    #[arg(long, global = true)]
    poll_interval: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Monitor drifter CSV files
    Drifter(MonitorArgs),

    /// Monitor SFMC glider CSV files
    Sfmc(MonitorArgs),

    /// Monitor the ship's position logs
    Position {
        #[command(flatten)]
        monitor: MonitorArgs,

        /// Platform name stored with each fix
        #[arg(long, default_value = DEFAULT_SHIP_NAME)]
        name: String,

        /// Platform class stored with each fix
        #[arg(long, default_value = DEFAULT_SHIP_CLASS)]
        class: String,
    },

    /// Monitor SCS shipboard sensor logs
    Scs(MonitorArgs),

    /// Reset stored offsets so files are re-read from the start
    Reset {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Create or upgrade the database schema
    InitSchema,
}

#[derive(Args, Debug)]
struct MonitorArgs {
    /// Directories to watch
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Override the file name pattern (regular expression on the whole name)
    #[arg(long)]
    pattern: Option<String>,

    /// Ingest existing files once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("arcterx-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(secs) = cli.settle_delay {
        config.monitor.settle_delay_secs = secs;
    }
    if let Some(mode) = cli.debounce {
        config.monitor.debounce = mode;
    }
    if let Some(secs) = cli.poll_interval {
        config.monitor.poll_interval_secs = secs;
    }
    config.validate()?;

    let store = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );
    store.migrate().await.context("Failed to run migrations")?;

    match cli.command {
        Command::Drifter(args) => {
            monitor(DrifterDecoder, DRIFTER_FILE_PATTERN, args, &config, store).await?;
        },
        Command::Sfmc(args) => {
            monitor(SfmcDecoder, SFMC_FILE_PATTERN, args, &config, store).await?;
        },
        Command::Position {
            monitor: args,
            name,
            class,
        } => {
            let decoder = PositionDecoder::new(name, class);
            monitor(decoder, POSITION_FILE_PATTERN, args, &config, store).await?;
        },
        Command::Scs(args) => {
            monitor(ScsDecoder, SCS_FILE_PATTERN, args, &config, store).await?;
        },
        Command::Reset { paths } => {
            for path in paths {
                let path = resolve_path(&path)
                    .with_context(|| format!("Invalid path {}", path.display()))?;
                if store.reset(&path).await? {
                    info!(path = %path.display(), "Offset reset to 0");
                } else {
                    warn!(path = %path.display(), "No stored offset");
                }
            }
        },
        Command::InitSchema => {
            info!("Schema is up to date");
        },
    }

    Ok(())
}

/// Sweep existing files, then follow changes until interrupted
async fn monitor<D>(
    decoder: D,
    default_pattern: &str,
    args: MonitorArgs,
    config: &IngestConfig,
    store: Arc<PgStore>,
) -> Result<()>
where
    D: LineDecoder + 'static,
    D::Row: PgRecord,
{
    let coordinator = Arc::new(IngestCoordinator::new(decoder, store));
    let source = coordinator.decoder_name();
    let pattern = args.pattern.as_deref().unwrap_or(default_pattern);

    let (scheduler, tx) = Scheduler::new(
        coordinator,
        pattern,
        config.monitor.debounce,
        config.monitor.settle_delay(),
        config.monitor.channel_capacity,
    )?;

    let mut watcher = PollingWatcher::new(tx, config.monitor.poll_interval());
    for dir in &args.dirs {
        watcher
            .add_watch(dir)
            .with_context(|| format!("Cannot watch {}", dir.display()))?;
    }

    let existing = watcher.prime().await?;
    scheduler.sweep(existing).await?;
    if args.once {
        info!(source, "Sweep complete");
        return Ok(());
    }

    info!(
        source,
        pattern,
        debounce = %config.monitor.debounce,
        settle_delay_secs = config.monitor.settle_delay_secs,
        "Monitoring for changes"
    );

    let mut watcher = tokio::spawn(watcher.run());
    let mut scheduler = scheduler.spawn();

    tokio::select! {
        result = &mut watcher => {
            result.context("Watcher task panicked")??;
            warn!(source, "Watcher stopped");
        },
        result = &mut scheduler => {
            result.context("Scheduler task panicked")??;
            warn!(source, "Scheduler stopped");
        },
        _ = tokio::signal::ctrl_c() => {
            info!(source, "Shutdown signal received");
        },
    }

    watcher.abort();
    scheduler.abort();
    Ok(())
}
