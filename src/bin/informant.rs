//! informant CLI: run the build listener, or check how a message filters.

use clap::{Parser, Subcommand};
use informant_rs::config::Config;
use informant_rs::config::secrets::{ExposeSecret, redacted_url};
use informant_rs::engine::{Coordinator, Interrupts};
use informant_rs::feed::LineFeed;
use informant_rs::filter::{Filter, SupportedBuilds};
use informant_rs::model::BuildEvent;
use informant_rs::processor::{BuildProcessor, HookProcessor};
use informant_rs::resources::ResourceTracker;
use informant_rs::store::Store;
use informant_rs::telemetry::{TelemetryConfig, init_telemetry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "informant", about = "Dispatch finished builds to test-discovery workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Listen to the build feed and process accepted builds
    Serve {
        /// Worker count (default: INFORMANT_WORKERS, else CPU count)
        #[arg(long)]
        workers: Option<usize>,
        /// Dispatch queue capacity (default: INFORMANT_QUEUE_CAPACITY)
        #[arg(long)]
        capacity: Option<usize>,
    },
    /// Show whether a stored feed message would be accepted
    Check {
        /// JSON file holding one feed message body
        message: PathBuf,
        /// Supported builds table (default: built-in)
        #[arg(long)]
        platforms: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { workers, capacity } => {
            let runtime = tokio::runtime::Runtime::new()?;
            let code = runtime.block_on(cmd_serve(workers, capacity))?;
            // Filesystem work cut short by a forced shutdown may still sit on
            // blocking threads; don't wait on it.
            runtime.shutdown_background();
            std::process::exit(code);
        }
        Command::Check { message, platforms } => cmd_check(message, platforms),
    }
}

async fn cmd_serve(workers: Option<usize>, capacity: Option<usize>) -> anyhow::Result<i32> {
    let mut config = Config::from_env()?;
    if let Some(n) = workers {
        anyhow::ensure!(n > 0, "--workers must be positive");
        config.workers = n;
    }
    if let Some(c) = capacity {
        anyhow::ensure!(c > 0, "--capacity must be positive");
        config.queue_capacity = c;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "build-informant".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let filter = Filter::new(config.supported_builds()?);
    info!(
        supported = filter.supported().len(),
        workers = config.workers,
        capacity = config.queue_capacity,
        "configuration loaded"
    );

    let mut interrupts = forward_interrupts();
    let resources = Arc::new(ResourceTracker::new());

    info!(store = %redacted_url(&config.database_url), "store configured");
    let store_url = config.database_url.expose_secret().to_string();
    let max_connections = u32::try_from(config.workers).unwrap_or(u32::MAX);
    let hook = config.hook.clone();
    let scratch = config.scratch_dir.clone();
    let tracker = Arc::clone(&resources);

    let connect = || async move {
        let store = Store::connect(&store_url, max_connections).await?;
        store.migrate().await?;
        tokio::fs::create_dir_all(&scratch).await?;
        let processor: Arc<dyn BuildProcessor> =
            Arc::new(HookProcessor::new(hook, scratch, tracker, Arc::new(store)));
        Ok::<_, informant_rs::Error>(processor)
    };
    let Some(coordinator) = Coordinator::start_or_interrupt(
        config.lifecycle(),
        filter,
        resources,
        connect,
        &mut interrupts,
    )
    .await?
    else {
        return Ok(1);
    };

    let feed = Arc::new(LineFeed::new(&config.feed_addr, LineFeed::unique_label()));
    info!(label = feed.label(), "feed client ready");

    let shutdown = coordinator.run(feed, interrupts).await;
    if !shutdown.cleanup.failed.is_empty() {
        warn!(failed = shutdown.cleanup.failed.len(), "some scratch resources were left behind");
    }
    info!(kind = ?shutdown.kind, "stopped");
    Ok(shutdown.exit_code())
}

/// Forward every Ctrl-C into a channel the coordinator reads.
fn forward_interrupts() -> Interrupts {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });
    rx
}

fn cmd_check(message: PathBuf, platforms: Option<PathBuf>) -> anyhow::Result<()> {
    let supported = match platforms {
        Some(path) => SupportedBuilds::load_from_file(&path)?,
        None => SupportedBuilds::default(),
    };
    let filter = Filter::new(supported);

    let content = std::fs::read_to_string(&message)?;
    let body: serde_json::Value = serde_json::from_str(&content)?;
    let event = BuildEvent::from_body(&body)
        .map_err(|e| anyhow::anyhow!("no usable build payload in {}: {e}", message.display()))?;

    println!("Build:      {}", event.build_id);
    println!("Platform:   {}", event.platform);
    println!("Build type: {}", event.build_type);
    println!(
        "Tags:       {}",
        if event.tags.is_empty() {
            "-".to_string()
        } else {
            event.tags.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    );
    match filter.check(&event) {
        Ok(()) => println!("Verdict:    accepted"),
        Err(reason) => println!("Verdict:    rejected ({reason})"),
    }
    Ok(())
}
