use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use momentka_capture::Camera;
use momentka_core::{CancelFlag, ModelPaths, ScanOutcome, ScanProgress};
use momentka_store::{
    AccessCode, BlobStore, CachedMediaList, Event, EventStore, MediaCache, RetentionWindow,
    StoreError,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod models;

use config::Config;

#[derive(Parser)]
#[command(name = "momentka", about = "Share event photos by code; filter them by face")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an event from media files and print its access code
    Create {
        /// Photos and videos to share
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Retention window in hours (6, 12, or 24)
        #[arg(short, long, default_value_t = 24)]
        retention: u32,
    },
    /// Show an event's media list
    Show {
        /// 5-digit access code
        code: String,
        /// Skip the local cache and fetch fresh
        #[arg(long)]
        refresh: bool,
    },
    /// Filter an event's photos to those showing one person
    Filter {
        /// 5-digit access code
        code: String,
        /// Reference photo of the person; omit to take a selfie
        #[arg(short, long)]
        reference: Option<PathBuf>,
        /// Match distance threshold (lower is stricter)
        #[arg(short, long)]
        threshold: Option<f32>,
    },
    /// List recently opened codes
    History,
    /// Delete expired events
    Sweep,
    /// Download missing face model files
    FetchModels,
    /// Show configuration, model, and camera status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Create { files, retention } => run_create(&config, &files, retention),
        Commands::Show { code, refresh } => run_show(&config, &code, refresh),
        Commands::Filter {
            code,
            reference,
            threshold,
        } => run_filter(&config, &code, reference, threshold).await,
        Commands::History => run_history(&config),
        Commands::Sweep => run_sweep(&config),
        Commands::FetchModels => run_fetch_models(&config).await,
        Commands::Status => run_status(&config),
    }
}

fn run_create(config: &Config, files: &[PathBuf], retention_hours: u32) -> Result<()> {
    let retention = RetentionWindow::from_hours(retention_hours)
        .context("retention must be 6, 12, or 24 hours")?;

    let mut blobs = BlobStore::new(&config.blob_dir);
    if let Some(base) = &config.blob_base_url {
        blobs = blobs.with_base_url(base);
    }

    let mut urls = Vec::with_capacity(files.len());
    for file in files {
        let blob = blobs
            .store_file(file)
            .with_context(|| format!("could not store {}", file.display()))?;
        tracing::info!(file = %file.display(), url = %blob.url, "media stored");
        urls.push(blob.url);
    }

    let mut store = open_store(config)?;
    let event = store.create_event(&urls, retention)?;

    println!("Event created with {} media item(s).", event.urls.len());
    println!("Access code: {}", event.code);
    println!(
        "Expires: {} ({retention})",
        event.expires_at.format("%Y-%m-%d %H:%M UTC")
    );
    Ok(())
}

fn run_show(config: &Config, code_raw: &str, refresh: bool) -> Result<()> {
    let code = parse_code(code_raw)?;
    let cache = MediaCache::new(&config.cache_dir);

    if !refresh {
        if let Some(list) = cache.load(&code)? {
            print_media_list(&code, &list.urls, true);
            return Ok(());
        }
    }

    let event = lookup_event(config, &cache, &code)?;
    cache.store(&CachedMediaList::new(code.clone(), event.urls.clone()))?;
    cache.remember(&code)?;
    print_media_list(&code, &event.urls, false);
    Ok(())
}

async fn run_filter(
    config: &Config,
    code_raw: &str,
    reference: Option<PathBuf>,
    threshold: Option<f32>,
) -> Result<()> {
    let code = parse_code(code_raw)?;
    let cache = MediaCache::new(&config.cache_dir);

    // Filtering always works on a fresh media list.
    let event = lookup_event(config, &cache, &code)?;
    cache.store(&CachedMediaList::new(code.clone(), event.urls.clone()))?;
    cache.remember(&code)?;

    let items = event.media_items();
    if items.is_empty() {
        println!("Event {code} has no media.");
        return Ok(());
    }

    ensure_models_available(config).await?;

    let threshold = threshold.unwrap_or(config.match_threshold);
    let handle = engine::spawn_engine(
        &config.model_dir,
        Duration::from_secs(config.fetch_timeout_secs),
    );

    let descriptor = match reference {
        Some(path) => {
            println!("Scanning reference photo {}...", path.display());
            handle.extract_reference(path).await?
        }
        None => {
            println!("Look at the camera...");
            handle
                .capture_reference(config.camera_device.clone())
                .await?
        }
    };
    println!("Reference face found. Scanning {} media item(s)...", items.len());

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("cancellation requested");
                cancel.cancel();
            }
        });
    }

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ScanProgress>();
    let bar = ProgressBar::new(items.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {percent:>3}% {pos}/{len} media").unwrap(),
    );
    let drain = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            bar.set_position(progress.processed as u64);
        }
        bar.finish_and_clear();
    });

    let outcome = handle
        .filter(items, descriptor, threshold, cancel, progress_tx)
        .await?;
    drain.await?;

    print_outcome(&outcome);
    Ok(())
}

fn run_history(config: &Config) -> Result<()> {
    let cache = MediaCache::new(&config.cache_dir);
    let codes = cache.history()?;
    if codes.is_empty() {
        println!("No recently opened codes.");
        return Ok(());
    }

    for code in codes {
        match cache.load(&code)? {
            Some(list) => println!("{code}  {} item(s)", list.urls.len()),
            None => println!("{code}"),
        }
    }
    Ok(())
}

fn run_sweep(config: &Config) -> Result<()> {
    let mut store = open_store(config)?;
    let removed = store.sweep_expired()?;
    println!("Removed {removed} expired event(s).");
    Ok(())
}

async fn run_fetch_models(config: &Config) -> Result<()> {
    let base = config
        .model_base_url
        .clone()
        .ok_or(models::ModelFetchError::NoBaseUrl)?;
    let model_dir = config.model_dir.clone();

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}").unwrap());
    spinner.set_message("downloading models...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let downloaded =
        tokio::task::spawn_blocking(move || models::fetch_missing_models(&model_dir, &base))
            .await??;
    spinner.finish_and_clear();

    match downloaded {
        0 => println!("All model files already present."),
        n => println!("Downloaded {n} model file(s)."),
    }
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    println!("momentka status");
    println!("  database:  {}", config.db_path.display());
    if config.db_path.exists() {
        let store = EventStore::open(&config.db_path)?;
        println!("  events:    {}", store.event_count()?);
    } else {
        println!("  events:    database not created yet");
    }
    println!("  blob root: {}", config.blob_dir.display());
    println!("  cache dir: {}", config.cache_dir.display());
    println!("  model dir: {}", config.model_dir.display());

    let paths = ModelPaths::in_dir(&config.model_dir);
    if paths.all_present() {
        println!("  models:    present");
    } else {
        for missing in paths.missing() {
            println!("  missing:   {}", missing.display());
        }
        println!("             run `momentka fetch-models` to download");
    }

    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("  cameras:   none found");
    } else {
        for device in devices {
            println!("  camera:    {} ({})", device.path, device.name);
        }
    }
    println!("  threshold: {}", config.match_threshold);
    Ok(())
}

/// Make sure both model files are on disk, downloading them first when a
/// base URL is configured.
async fn ensure_models_available(config: &Config) -> Result<()> {
    let paths = ModelPaths::in_dir(&config.model_dir);
    if paths.all_present() {
        return Ok(());
    }
    let Some(base) = config.model_base_url.clone() else {
        bail!(
            "model files missing from {} — set model_base_url and run `momentka fetch-models`",
            config.model_dir.display()
        );
    };

    tracing::info!("model files missing, downloading before first load");
    let model_dir = config.model_dir.clone();
    tokio::task::spawn_blocking(move || models::fetch_missing_models(&model_dir, &base)).await??;
    Ok(())
}

fn open_store(config: &Config) -> Result<EventStore> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(EventStore::open(&config.db_path)?)
}

fn parse_code(raw: &str) -> Result<AccessCode> {
    AccessCode::parse(raw).context("access codes are 5 digits, like 48215")
}

/// Fetch an event a viewer may see. Dead codes also clear the viewer's
/// cache and history entry for them.
fn lookup_event(config: &Config, cache: &MediaCache, code: &AccessCode) -> Result<Event> {
    let store = open_store(config)?;
    match store.lookup_active(code) {
        Ok(event) => Ok(event),
        Err(err @ (StoreError::NotFound | StoreError::Expired)) => {
            cache.forget(code)?;
            Err(err.into())
        }
        Err(other) => Err(other.into()),
    }
}

fn print_media_list(code: &AccessCode, urls: &[String], cached: bool) {
    let suffix = if cached { " (cached)" } else { "" };
    println!("Event {code}: {} media item(s){suffix}", urls.len());
    for (index, url) in urls.iter().enumerate() {
        println!("  {:>2}. {url}", index + 1);
    }
}

fn print_outcome(outcome: &ScanOutcome) {
    if outcome.cancelled {
        println!("Scan cancelled after {} item(s).", outcome.items_scanned);
    }
    if outcome.all_items_failed() {
        println!("Warning: every photo failed to download or decode — check your connection.");
    } else if outcome.failed_items > 0 {
        println!("Note: {} item(s) could not be processed.", outcome.failed_items);
    }
    if outcome.videos_skipped > 0 {
        println!(
            "Skipped {} video(s) — matching covers photos only.",
            outcome.videos_skipped
        );
    }

    match outcome.matched_count() {
        0 => println!("No matching photos."),
        n => {
            println!("{n} matching photo(s):");
            for item in &outcome.matched {
                println!("  {}", item.url);
            }
        }
    }
}
