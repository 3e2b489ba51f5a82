// Clip Sentry CLI binary

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use clip_sentry_lib::alerts::{AlertStatus, AlertStore};
use clip_sentry_lib::config::{Config, Layout};
use clip_sentry_lib::constants::{self, DEFAULT_ALERT_LIST_LIMIT};
use clip_sentry_lib::detect::command::CommandDetector;
use clip_sentry_lib::detect::sampler::FfmpegSampler;
use clip_sentry_lib::detect::AlertRule;
use clip_sentry_lib::error::SentryError;
use clip_sentry_lib::ingest::IngestStage;
use clip_sentry_lib::processor::{IntakeProcessor, ProcessorService};
use clip_sentry_lib::queue::JobQueue;
use clip_sentry_lib::tools;
use clip_sentry_lib::worker::{ArtifactWorker, FfmpegGifEncoder, JobOutcome};

#[derive(Parser)]
#[command(name = "clipsentry")]
#[command(about = "Clip Sentry - dashcam clip ingestion, detection and alerts", long_about = None)]
#[command(version)]
struct Cli {
    /// Base directory for inbox, processed, alerts, media and jobs
    #[arg(long, global = true, env = constants::ENV_BASE_DIR)]
    base_dir: Option<PathBuf>,

    /// Dashcam source tree (read-only)
    #[arg(long, global = true, env = constants::ENV_SOURCE_DIR)]
    source_dir: Option<PathBuf>,

    /// JSON tunables file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the directory layout
    Init,

    /// Run ingestion and detection
    Processor {
        /// Run a single ingest scan and intake pass, then exit
        #[arg(long)]
        once: bool,
    },

    /// Render queued alert GIFs
    GifWorker {
        /// Process every pending job, then exit
        #[arg(long)]
        drain: bool,
    },

    /// List alerts, newest first
    Alerts {
        /// Maximum alerts to show
        #[arg(long, default_value_t = DEFAULT_ALERT_LIST_LIMIT)]
        limit: usize,
        /// Show one alert as JSON
        #[arg(long)]
        id: Option<String>,
    },

    /// Show queue counts and tool availability
    Status,

    /// Resolve a media file name to its path
    Media {
        /// File name inside the media directory
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let layout = Layout::resolve(cli.base_dir, cli.source_dir);
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => cmd_init(&layout),
        Commands::Processor { once } => cmd_processor(&layout, &config, once),
        Commands::GifWorker { drain } => cmd_gif_worker(&layout, &config, drain),
        Commands::Alerts { limit, id } => cmd_alerts(&layout, limit, id),
        Commands::Status => cmd_status(&layout),
        Commands::Media { name } => cmd_media(&layout, &name),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();
}

/// Ctrl+C flips the flag; long-running loops check it between cycles.
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("shutdown requested");
        flag.store(true, Ordering::Relaxed);
    })
    .context("installing Ctrl+C handler")?;
    Ok(shutdown)
}

fn cmd_init(layout: &Layout) -> Result<()> {
    layout.ensure_dirs()?;

    println!("Initialized {}", layout.base_dir.display());
    println!("Structure created:");
    println!("  inbox/           - Clips waiting for detection");
    println!("  processed/       - Archived clips (error_ prefix on failure)");
    println!("  alerts/          - Alert records");
    println!("  media/           - Snapshots and GIFs");
    println!("  jobs/gif_queue/  - GIF jobs");

    Ok(())
}

fn cmd_processor(layout: &Layout, config: &Config, once: bool) -> Result<()> {
    layout.ensure_dirs()?;
    require_tool("ffmpeg")?;

    let detector = CommandDetector::from_config(&config.detection)
        .context("detection.detector_command must name the detector program")?;
    let intake = IntakeProcessor::new(
        layout,
        AlertRule::from_config(&config.detection),
        Box::new(FfmpegSampler::from_config(&config.detection)),
        Box::new(detector),
    );
    let ingest = IngestStage::new(layout, &config.stability);
    let mut service = ProcessorService::new(ingest, intake, config.poll.clone());

    info!(
        "processor: watching {} -> {}",
        layout.source_dir.display(),
        layout.intake_dir().display()
    );

    if once {
        service.startup();
        let (ingested, processed) = service.run_once()?;
        println!("Ingest:  {} discovered, {} copied, {} unstable, {} failed",
            ingested.discovered, ingested.copied, ingested.unstable, ingested.failed);
        println!("Intake:  {} clips, {} alerts, {} failed",
            processed.clips, processed.alerts, processed.failed);
        return Ok(());
    }

    let shutdown = shutdown_flag()?;
    service.run(&shutdown);
    Ok(())
}

fn cmd_gif_worker(layout: &Layout, config: &Config, drain: bool) -> Result<()> {
    layout.ensure_dirs()?;
    require_tool("ffmpeg")?;

    let worker = ArtifactWorker::new(layout, Box::new(FfmpegGifEncoder::new(config.gif.clone())));

    if drain {
        let outcomes = worker.drain()?;
        let failed = outcomes
            .iter()
            .filter(|o| matches!(o, JobOutcome::Failed { .. }))
            .count();
        println!("Processed {} jobs ({} failed)", outcomes.len(), failed);
        return Ok(());
    }

    let shutdown = shutdown_flag()?;
    worker.run(&config.poll, &shutdown);
    Ok(())
}

fn cmd_alerts(layout: &Layout, limit: usize, id: Option<String>) -> Result<()> {
    let store = AlertStore::new(layout.alerts_dir(), layout.media_dir());

    if let Some(id) = id {
        let record = store
            .get(&id)?
            .ok_or_else(|| SentryError::AlertNotFound(id.clone()))?;
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    let alerts = store.list_newest_first(Some(limit))?;
    if alerts.is_empty() {
        println!("No alerts yet.");
        return Ok(());
    }

    println!("{:<14}  {:<19}  {:>5}  {:>4}  {:<10}  {}", "ID", "When", "Score", "Hits", "Status", "Source");
    println!("{}", "-".repeat(90));

    for alert in &alerts {
        let when = chrono::DateTime::from_timestamp(alert.timestamp, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<14}  {:<19}  {:>5.2}  {:>4}  {:<10}  {}",
            alert.id,
            when,
            alert.score,
            alert.hits.len(),
            alert.status.as_str(),
            alert.source_file
        );
    }

    if alerts.len() == limit {
        println!();
        println!("Showing the newest {}. Use --limit to see more.", limit);
    }

    Ok(())
}

fn cmd_status(layout: &Layout) -> Result<()> {
    println!("Base:     {}", layout.base_dir.display());
    println!("Source:   {}{}", layout.source_dir.display(), presence(&layout.source_dir));
    println!();

    println!("Directories:");
    for dir in [
        layout.intake_dir(),
        layout.processed_dir(),
        layout.alerts_dir(),
        layout.media_dir(),
        layout.queue_dir(),
    ] {
        println!("  {}{}", dir.display(), presence(&dir));
    }
    println!();

    println!("Inbox:     {}", count_clips(&layout.intake_dir()));
    println!("Processed: {}", count_clips(&layout.processed_dir()));

    let queue = JobQueue::new(layout.queue_dir());
    match queue.counts() {
        Ok(c) => println!("GIF jobs:  {} pending, {} claimed, {} done", c.pending, c.claimed, c.done),
        Err(_) => println!("GIF jobs:  (no queue yet, run 'clipsentry init')"),
    }

    let store = AlertStore::new(layout.alerts_dir(), layout.media_dir());
    let alerts = store.list_newest_first(None).unwrap_or_default();
    println!("Alerts:    {}", alerts.len());
    for status in [AlertStatus::Queued, AlertStatus::GifQueued, AlertStatus::GifDone, AlertStatus::GifFailed] {
        let count = alerts.iter().filter(|a| a.status == status).count();
        println!("  {:<10} {}", status.as_str(), count);
    }

    println!();
    println!("Tools:");
    for tool in ["ffmpeg", "ffprobe"] {
        let state = if tools::is_tool_available(tool) { "ok" } else { "MISSING" };
        println!("  {:<8} {}", tool, state);
    }

    Ok(())
}

fn presence(dir: &Path) -> &'static str {
    if dir.is_dir() { "" } else { "  (missing)" }
}

fn cmd_media(layout: &Layout, name: &str) -> Result<()> {
    let store = AlertStore::new(layout.alerts_dir(), layout.media_dir());
    let path = store.media_path(name)?;
    println!("{}", path.display());
    Ok(())
}

fn require_tool(tool: &str) -> Result<()> {
    if !tools::is_tool_available(tool) {
        anyhow::bail!("{} not found (set {} or install it on PATH)", tool, match tool {
            "ffprobe" => constants::ENV_FFPROBE_PATH,
            _ => constants::ENV_FFMPEG_PATH,
        });
    }
    Ok(())
}

fn count_clips(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| clip_sentry_lib::ingest::discover::is_clip_file(&e.path()))
                .count()
        })
        .unwrap_or(0)
}
