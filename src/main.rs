//! Operator CLI for the politsei game backend.
//!
//! Commands:
//! - `init` - write a starter `config.toml` and create the data directory
//! - `status` - store summary and process counters
//! - `serve` - run the crime sweep scheduler until interrupted
//! - `crime [--refresh]` - crime ranking of the active shard
//! - `leaderboard [--limit N] [--refresh]` - player leaderboard
//! - `sweep <daily|monthly|reset-all>` - run a crime sweep now
//! - `recompute-levels --yes` - fix player levels from experience
//! - `restock --yes` - refill limited shop items
//! - `check-indexes` - verify the composite indexes the services need
//!
//! See the library crate docs for module-level details: `politsei::`.
use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use politsei::config::Config;
use politsei::game::scheduler::{SweepScheduler, SweepTargets};
use politsei::game::{admin, indexed_queries, GameContext, GameError};
use politsei::metrics;
use politsei::store::run_blocking;

#[derive(Parser)]
#[command(name = "politsei")]
#[command(about = "Crime index, leaderboards and admin jobs for the police RPG")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Shard to operate on; defaults to the configured default shard
    #[arg(short, long, global = true)]
    shard: Option<String>,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a default configuration file
    Init,
    /// Show store summary and counters
    Status,
    /// Run the crime sweep scheduler
    Serve,
    /// Show the crime ranking
    Crime {
        /// Bypass the cached aggregate views
        #[arg(long)]
        refresh: bool,
    },
    /// Show the player leaderboard
    Leaderboard {
        #[arg(short, long)]
        limit: Option<usize>,
        /// Bypass the cached page
        #[arg(long)]
        refresh: bool,
    },
    /// Run a crime sweep immediately
    Sweep {
        #[arg(value_enum)]
        kind: SweepKind,
        /// Required for reset-all
        #[arg(long)]
        yes: bool,
    },
    /// Recompute every player's level from experience
    RecomputeLevels {
        /// Confirm the irreversible bulk update
        #[arg(long)]
        yes: bool,
    },
    /// Refill every limited shop item to its maximum stock
    Restock {
        /// Confirm the irreversible bulk update
        #[arg(long)]
        yes: bool,
    },
    /// Check that the store declares every index the services query with
    CheckIndexes,
}

#[derive(Clone, Copy, ValueEnum)]
enum SweepKind {
    Daily,
    Monthly,
    ResetAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(&None, cli.verbose);
        info!("Initializing new politsei configuration");
        let config = Config::default();
        Config::create_default(&cli.config).await?;
        tokio::fs::create_dir_all(&config.storage.data_dir).await?;
        info!("Configuration file created at {}", cli.config);
        return Ok(());
    }

    let config = Config::load(&cli.config).await?;
    init_logging(&Some(config.clone()), cli.verbose);
    config.validate()?;
    let timeout = config.storage.operation_timeout();

    let mut ctx = GameContext::open(config)?;
    if let Some(shard) = &cli.shard {
        ctx.switch_shard(shard)?;
    }

    match cli.command {
        // handled before the store is opened
        Commands::Init => {}
        Commands::Status => show_status(&ctx).await?,
        Commands::Serve => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let targets = SweepTargets {
                store: ctx.store().clone(),
                cache: ctx.cache().clone(),
                shards: ctx.shards(),
                crime: ctx.config().crime.clone(),
                operation_timeout: timeout,
            };
            let scheduler = SweepScheduler::new(ctx.config().scheduler.clone());
            let handle = tokio::spawn(scheduler.run(targets, shutdown_rx));
            info!("politsei v{} running; Ctrl-C to stop", env!("CARGO_PKG_VERSION"));
            tokio::signal::ctrl_c().await?;
            let _ = shutdown_tx.send(true);
            handle.await?;
        }
        Commands::Crime { refresh } => {
            let aggregation = ctx.aggregation();
            let views = run_blocking(timeout, move || {
                Ok::<_, GameError>(aggregation.aggregate_views(refresh))
            })
            .await?;
            if views.stale {
                warn!("aggregate views are stale; store unavailable");
            }
            println!("Kuritegevus ({}):", ctx.shard());
            for row in &views.crime {
                println!(
                    "{:>2}. {:<12} {:<20} {:>6.2}%  {} ametnikku",
                    row.rank, row.department, row.prefecture, row.crime_level, row.headcount
                );
            }
        }
        Commands::Leaderboard { limit, refresh } => {
            let aggregation = ctx.aggregation();
            let page = run_blocking(timeout, move || aggregation.leaderboard(limit, refresh)).await?;
            if page.degraded {
                warn!("leaderboard built without its composite index; order is approximate");
            }
            for entry in &page.entries {
                println!(
                    "{:>3}. {:<20} tase {:>3}  maine {:>6}  {}",
                    entry.rank,
                    entry.username,
                    entry.level,
                    entry.reputation,
                    entry.department.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Sweep { kind, yes } => {
            if matches!(kind, SweepKind::ResetAll) && !yes {
                bail!("reset-all resets every department of the shard; re-run with --yes");
            }
            let crime = ctx.crime();
            let report = run_blocking(timeout, move || {
                let now = Utc::now();
                Ok::<_, GameError>(match kind {
                    SweepKind::Daily => crime.daily_increase_sweep_at(now),
                    SweepKind::Monthly => crime.monthly_reset_sweep_at(now),
                    SweepKind::ResetAll => crime.reset_all_at(now),
                })
            })
            .await?;
            println!(
                "examined {}, changed {}, created {}, errors {}",
                report.examined,
                report.changed,
                report.created,
                report.errors.len()
            );
            for error in &report.errors {
                println!("  {error}");
            }
        }
        Commands::RecomputeLevels { yes } => {
            if !yes {
                bail!("recompute-levels rewrites player documents; re-run with --yes");
            }
            let store = ctx.store().clone();
            let batch_size = ctx.config().admin.batch_size;
            // Bulk jobs scan whole collections; give them more room than a single call.
            let report = run_blocking(timeout * 60, move || {
                admin::recompute_levels(store.as_ref(), batch_size, Utc::now())
            })
            .await?;
            ctx.aggregation().invalidate();
            print_batch_report("levels corrected", &report);
        }
        Commands::Restock { yes } => {
            if !yes {
                bail!("restock overwrites shop stock; re-run with --yes");
            }
            let store = ctx.store().clone();
            let cache = ctx.cache().clone();
            let shard = ctx.shard().clone();
            let batch_size = ctx.config().admin.batch_size;
            let report = run_blocking(timeout, move || {
                Ok::<_, GameError>(admin::restock_items(store.as_ref(), &cache, &shard, batch_size, Utc::now()))
            })
            .await?;
            print_batch_report("items restocked", &report);
        }
        Commands::CheckIndexes => {
            let limit = ctx.config().leaderboard.default_limit;
            let mut missing = 0;
            for (label, query) in indexed_queries(ctx.shard(), limit) {
                match query.required_index() {
                    Some(index) if ctx.store().has_index(&index) => println!("ok       {label}: {index}"),
                    Some(index) => {
                        missing += 1;
                        println!("MISSING  {label}: {index}");
                    }
                    None => println!("ok       {label}: no composite index needed"),
                }
            }
            if missing > 0 {
                bail!("{missing} index(es) missing; add them to [storage].indexes");
            }
        }
    }

    ctx.close();
    Ok(())
}

async fn show_status(ctx: &GameContext) -> Result<()> {
    let store = ctx.store().clone();
    let (players, crime_states) = run_blocking(ctx.config().storage.operation_timeout(), move || {
        Ok::<_, politsei::store::StoreError>((store.count("players")?, store.count("departmentCrime")?))
    })
    .await?;
    println!("politsei v{}", env!("CARGO_PKG_VERSION"));
    println!("store: {}", ctx.config().storage.db_path().display());
    println!("shard: {} (of {})", ctx.shard(), ctx.config().game.shards.join(", "));
    println!("players: {players}, crime states: {crime_states}");
    for index in ctx.store().declared_indexes() {
        println!("index: {index}");
    }

    let snapshot = metrics::snapshot();
    println!(
        "degraded queries: {}, stale fallbacks: {}, malformed documents: {}",
        snapshot.degraded_queries, snapshot.stale_fallbacks, snapshot.malformed_documents
    );
    println!(
        "batches committed: {}, failed: {}, transactions aborted: {}, sweeps: {}",
        snapshot.batches_committed, snapshot.batches_failed, snapshot.transactions_aborted, snapshot.sweeps_run
    );
    let mut families: Vec<_> = snapshot.cache.into_iter().collect();
    families.sort_by(|a, b| a.0.cmp(&b.0));
    for (family, counter) in families {
        println!(
            "cache {family}: {} hits, {} misses ({} stale)",
            counter.hits, counter.misses, counter.stale
        );
    }
    Ok(())
}

fn print_batch_report(what: &str, report: &admin::BatchReport) {
    println!(
        "processed {}, {} {}, batches committed {}, failed {}",
        report.processed, what, report.updated, report.batches_committed, report.batches_failed
    );
    for error in &report.errors {
        println!("  {error}");
    }
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|cfg| cfg.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled is chatty at debug
    builder.filter_module("sled", log::LevelFilter::Warn);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());

    match log_file {
        Some(file) => {
            let file = std::sync::Mutex::new(file);
            // Echo to the console only when someone is watching it
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
