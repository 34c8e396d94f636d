//! # Media Pipeline - Main Entry Point
//!
//! Batch CLI over the pipeline library.
//!
//! ## Responsibilities:
//! - Parsing the command line with `clap`
//! - Initializing `tracing` (RUST_LOG aware, `--verbose` for DEBUG)
//! - Loading the configuration (file, then environment, then flags)
//! - Crawling the media root into the store and saving the store afterwards
//!
//! ## Execution flow:
//! 1. Parse arguments and set up logging
//! 2. Build and validate the `Config`
//! 3. Check that ffmpeg/ffprobe can be executed
//! 4. Load the store snapshot and register the crawled containers
//! 5. Run the subcommand container by container, reporting progress
//! 6. Save the snapshot and print totals
//!
//! ## Examples:
//! ```bash
//! media-pipeline --dir /srv/media previews --reset
//! media-pipeline --dir /srv/media duplicates --remove
//! media-pipeline --dir /srv/media --json tasks --operation video_encoding
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use media_pipeline::json_output::{ContainerReport, JsonMessage};
use media_pipeline::progress::{BatchStats, ProgressManager};
use media_pipeline::{
    create_container_previews, encode_container_videos, find_duplicate_contents, register_default_handlers,
    remove_duplicate_contents, submit_task, Config, Container, ContentManager, FfmpegTranscoder, FileManager,
    MemoryStore, TaskContext, TaskDispatcherBuilder, TaskOperation, TaskRequest, ToolCommands, Transcoder,
};

#[derive(Parser)]
#[command(name = "media-pipeline")]
#[command(about = "Generate previews, re-encode videos and find duplicates in a media library")]
struct Args {
    /// Media root directory (overrides DIR and the config file)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Store snapshot file (defaults to one per media root under ~/.media-pipeline)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Number of preview workers; encoding uses half
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Emit one JSON object per line instead of a progress bar
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create previews for every container
    Previews {
        /// Delete existing previews first
        #[arg(long)]
        reset: bool,
    },
    /// Re-encode videos into the configured codec
    Encode,
    /// Flag originals that were kept next to their re-encoded copy
    Duplicates {
        /// Also remove the flagged originals
        #[arg(long)]
        remove: bool,
    },
    /// Run an operation as tasks through the dispatcher
    Tasks {
        /// create_previews, screen_capture, webp_from_screens, video_encoding,
        /// detect_duplicates or remove_duplicate_files
        #[arg(long)]
        operation: TaskOperation,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Previews { .. } => "previews",
            Command::Encode => "encode",
            Command::Duplicates { .. } => "duplicates",
            Command::Tasks { .. } => "tasks",
        }
    }
}

async fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).await?,
        None => Config::default(),
    };
    config.apply_env()?;
    if let Some(dir) = &args.dir {
        config.dir = dir.clone();
    }
    if let Some(workers) = args.workers {
        config.core_count = workers;
    }
    config.json_output |= args.json;
    config.validate()?;

    if !config.dir.is_dir() {
        return Err(anyhow::anyhow!(
            "Media directory does not exist: {}",
            config.dir.display()
        ));
    }
    Ok(config)
}

fn report_container(config: &Config, progress: &ProgressManager, container: &Container, report: ContainerReport<'_>, line: String) {
    if config.json_output {
        JsonMessage::ContainerComplete {
            container: &container.name,
            report,
        }
        .emit();
    }
    progress.update(&line);
}

async fn run_batch(
    command: &Command,
    store: &MemoryStore,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    containers: &[Container],
) -> Result<BatchStats> {
    let mut stats = BatchStats::default();
    let progress = ProgressManager::new(containers.len() as u64, config.json_output);

    for container in containers {
        progress.set_message(&container.name);
        match command {
            Command::Previews { reset } => {
                let report =
                    create_container_previews(store, transcoder.clone(), config.clone(), container.id, *reset).await?;
                stats.add_previews(&report);
                let line = format!(
                    "{}: {} created, {} failed",
                    container.name,
                    report.created,
                    report.failures.len()
                );
                report_container(&config, &progress, container, ContainerReport::Previews(&report), line);
            }
            Command::Encode => {
                let report = encode_container_videos(store, transcoder.clone(), config.clone(), container.id).await?;
                stats.add_encoding(&report);
                let line = format!(
                    "{}: {} encoded, {} skipped",
                    container.name,
                    report.encoded.len(),
                    report.skipped.len()
                );
                report_container(&config, &progress, container, ContainerReport::Encoding(&report), line);
            }
            Command::Duplicates { remove } => {
                let report = find_duplicate_contents(store, &*transcoder, &config, container.id).await?;
                stats.add_duplicates(&report);
                let line = format!("{}: {} duplicates", container.name, report.duplicates.len());
                report_container(&config, &progress, container, ContainerReport::Duplicates(&report), line);

                if *remove {
                    let removal = remove_duplicate_contents(store, &config, container.id).await?;
                    stats.add_removal(&removal);
                    if config.json_output {
                        JsonMessage::ContainerComplete {
                            container: &container.name,
                            report: ContainerReport::Removal(&removal),
                        }
                        .emit();
                    }
                }
            }
            Command::Tasks { .. } => return Err(anyhow::anyhow!("tasks run through the dispatcher")),
        }
    }

    progress.finish(&stats.format_summary());
    Ok(stats)
}

/// One task per container, or per video for operations on single content items.
fn tasks_for(store: &MemoryStore, operation: TaskOperation, containers: &[Container]) -> Result<Vec<TaskRequest>> {
    let mut tasks = Vec::new();
    for container in containers {
        match operation {
            TaskOperation::Previews | TaskOperation::DetectDuplicates | TaskOperation::RemoveDuplicateFiles => {
                tasks.push(TaskRequest::for_container(operation, container.id));
            }
            TaskOperation::Screens | TaskOperation::WebpFromScreens | TaskOperation::Encoding => {
                for content in store.list_content(container.id)? {
                    if content.is_video() {
                        tasks.push(TaskRequest::for_content(operation, content.id));
                    }
                }
            }
        }
    }
    Ok(tasks)
}

async fn run_tasks(
    operation: TaskOperation,
    store: Arc<MemoryStore>,
    transcoder: Arc<dyn Transcoder>,
    config: Arc<Config>,
    containers: &[Container],
) -> Result<BatchStats> {
    let ctx = TaskContext::new(store.clone(), transcoder, config.clone());
    let dispatcher = register_default_handlers(TaskDispatcherBuilder::from_config(&config), ctx).start();

    let requests = tasks_for(&store, operation, containers)?;
    let progress = ProgressManager::new(requests.len() as u64, config.json_output);
    let mut pending = Vec::with_capacity(requests.len());
    for request in requests {
        match submit_task(&*store, &config, &dispatcher, request).await {
            Ok(task) => pending.push(task.id),
            Err(e) => warn!("Could not submit task: {}", e),
        }
    }
    info!("Submitted {} {} tasks", pending.len(), operation);

    let mut stats = BatchStats::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    while !pending.is_empty() {
        ticker.tick().await;
        let mut still_running = Vec::with_capacity(pending.len());
        for id in pending {
            let task = store.get_task(id)?;
            if !task.status.is_terminal() {
                still_running.push(id);
                continue;
            }
            stats.items += 1;
            if task.err_msg.is_empty() {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
            if config.json_output {
                JsonMessage::Task { task: &task }.emit();
            }
            progress.update(&format!("task {} {}", task.id, task.status));
        }
        pending = still_running;
    }
    dispatcher.shutdown().await;

    stats.containers = containers.len();
    progress.finish(&stats.format_summary());
    Ok(stats)
}

async fn run(args: Args) -> Result<()> {
    let started = Instant::now();
    let config = Arc::new(load_config(&args).await?);

    let tools = ToolCommands::from_env();
    let missing = tools.missing().await;
    if !missing.is_empty() {
        return Err(anyhow::anyhow!(
            "Required tools not found: {} (set FFMPEG_PATH / FFPROBE_PATH)",
            missing.join(", ")
        ));
    }
    let transcoder: Arc<dyn Transcoder> = Arc::new(FfmpegTranscoder::new(tools, config.tool_timeout()));

    let store_path = match &args.store {
        Some(path) => path.clone(),
        None => MemoryStore::snapshot_path(&config.dir)?,
    };
    let store = Arc::new(
        MemoryStore::load(&store_path)
            .await
            .with_context(|| format!("Failed to load store {}", store_path.display()))?,
    );

    let spinner = (!config.json_output).then(|| ProgressManager::spinner("Scanning media directory..."));
    let crawled = FileManager::crawl(&config.dir)?;
    let containers = FileManager::register(&*store, crawled)?;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    info!("Found {} containers under {}", containers.len(), config.dir.display());

    let command_name = args.command.name();
    if config.json_output {
        JsonMessage::Start {
            command: command_name,
            media_dir: config.dir.clone(),
            containers: containers.len(),
        }
        .emit();
    }

    let outcome = match &args.command {
        Command::Tasks { operation } => {
            run_tasks(*operation, store.clone(), transcoder, config.clone(), &containers).await
        }
        command => run_batch(command, &store, transcoder, config.clone(), &containers).await,
    };

    store
        .save(&store_path)
        .await
        .with_context(|| format!("Failed to save store {}", store_path.display()))?;
    let stats = outcome?;

    if config.json_output {
        JsonMessage::Complete {
            command: command_name,
            stats: &stats,
            duration_seconds: started.elapsed().as_secs_f64(),
        }
        .emit();
    } else {
        info!("{}", stats.format_summary());
    }

    if stats.has_failures() {
        return Err(anyhow::anyhow!("{} items failed", stats.failed));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let json = args.json;
    let result = run(args).await;
    if let Err(e) = &result {
        if json {
            JsonMessage::Error {
                message: format!("{:#}", e),
            }
            .emit();
        }
    }
    result
}
