//! Scene Cache - maintenance tool for the generation cache and image store.
//!
//! `sweep`, `stats` and `check` take ownership of the storage root and are
//! refused while a serving process holds it; such a process sweeps with
//! `Sweeper::run_periodically` instead. `backup` only reads the state files
//! and runs alongside a server.

use clap::Parser;
use serde::Serialize;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scene_cache::{
    cache::{GenerationCache, Offline},
    clock::{self, Clock},
    config::{Cli, Command, Config, SweepTarget},
    limit::RateLimiter,
    maintenance::{BackupRotation, Sweeper},
    persist::{read_raw, CACHE_STATE_FILE, IMAGE_STATE_FILE, STATE_DIR},
    repository::{ImageRepository, NoOwners},
    service::SceneService,
    store::{write_atomic, ArtifactStore},
    Error, StorageError,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Sweep(args) => run_job(&args.config, run_sweep(&args.config, args.target)).await,
        Command::Backup(config) => run_job(&config, run_backup(&config)).await,
        Command::Stats(config) => run_job(&config, run_stats(&config)).await,
        Command::Check(config) => run_check(&config).await,
    }
}

/// Set up logging, validate `config`, then run `job`.
async fn run_job<F>(config: &Config, job: F) -> ExitCode
where
    F: Future<Output = Result<(), Error>>,
{
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match job.await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "scene_cache=debug"
    } else {
        "scene_cache=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Error> {
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        Error::StorageFailure(StorageError::Encode {
            message: e.to_string(),
        })
    })?;
    println!("{}", json);
    Ok(())
}

// =============================================================================
// Engine
// =============================================================================

struct Engine {
    clock: Arc<dyn Clock>,
    cache: GenerationCache<Offline>,
    repository: Arc<ImageRepository>,
}

async fn open_engine(config: &Config) -> Result<Engine, Error> {
    let clock = clock::system();
    let store = Arc::new(ArtifactStore::open(config.store_settings()).await?);
    let repository = Arc::new(ImageRepository::open(&store, clock.clone()).await?);
    let cache = GenerationCache::open(Offline, store, config.cache_settings(), clock.clone()).await?;

    info!(root = %config.root.display(), "opened storage root");
    Ok(Engine {
        clock,
        cache,
        repository,
    })
}

// =============================================================================
// Sweep Command
// =============================================================================

async fn run_sweep(config: &Config, target: SweepTarget) -> Result<(), Error> {
    let engine = open_engine(config).await?;
    let sweeper = Sweeper::new(
        engine.cache,
        engine.repository,
        Arc::new(NoOwners),
        engine.clock,
    )
    .with_orphan_retention(config.orphan_retention());

    let reports = match target {
        SweepTarget::Expire => vec![sweeper.expire_cache().await?],
        SweepTarget::Orphans => vec![sweeper.reclaim_orphans().await?],
        SweepTarget::All => sweeper.run_all().await?,
    };

    print_json(&reports)
}

// =============================================================================
// Backup Command
// =============================================================================

async fn run_backup(config: &Config) -> Result<(), Error> {
    let rotation = BackupRotation::new(&config.root, clock::system())
        .with_retention(config.backup_retention());
    let report = rotation.run().await?;
    print_json(&report)
}

// =============================================================================
// Stats Command
// =============================================================================

async fn run_stats(config: &Config) -> Result<(), Error> {
    let engine = open_engine(config).await?;
    let service = SceneService::new(
        Arc::new(RateLimiter::new(config.limits())),
        engine.cache,
        engine.repository,
    );
    print_json(&service.stats().await?)
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: &Config) -> ExitCode {
    if config.verbose {
        init_logging(true);
    }

    println!("Scene Cache Configuration Check");
    println!("═══════════════════════════════");
    println!();

    match config.validate() {
        Ok(()) => println!("✓ Configuration valid"),
        Err(e) => {
            println!("✗ Configuration: {}", e);
            return ExitCode::FAILURE;
        }
    }
    println!("  Root: {}", config.root.display());
    println!("  Cache TTL: {} days", config.cache_ttl_days);
    println!(
        "  Thumbnails: {}x{} @ quality {}",
        config.thumbnail_width, config.thumbnail_height, config.jpeg_quality
    );
    println!(
        "  Limits: images {}/{}s, scenes {}/{}s",
        config.images_limit,
        config.images_window_secs,
        config.scenes_limit,
        config.scenes_window_secs
    );
    println!();

    print!("Opening storage root... ");
    // Held until the check finishes
    let _store = match ArtifactStore::open(config.store_settings()).await {
        Ok(store) => store,
        Err(e) => {
            println!("✗ failed");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!("✓ ok");

    print!("Testing write access... ");
    let marker = config.root.join(STATE_DIR).join(".check");
    let writable = match tokio::fs::create_dir_all(config.root.join(STATE_DIR)).await {
        Ok(()) => write_atomic(&marker, b"ok").await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    match writable {
        Ok(()) => {
            let _ = tokio::fs::remove_file(&marker).await;
            println!("✓ writable");
        }
        Err(e) => {
            println!("✗ not writable");
            println!();
            println!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    }

    for name in [CACHE_STATE_FILE, IMAGE_STATE_FILE] {
        print!("Reading state/{}... ", name);
        let path = config.root.join(STATE_DIR).join(name);
        match read_raw(&path).await {
            Ok(None) => println!("- absent"),
            Ok(Some(raw)) => match serde_json::from_slice::<serde_json::Value>(&raw) {
                Ok(_) => println!("✓ ok ({} bytes)", raw.len()),
                Err(e) => {
                    println!("✗ corrupt");
                    println!();
                    println!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            },
            Err(e) => {
                println!("✗ unreadable");
                println!();
                println!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    println!();
    println!("═══════════════════════════════");
    println!("✓ All checks passed!");

    ExitCode::SUCCESS
}
