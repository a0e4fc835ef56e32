use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use veg_crawler::app::ports::{HttpClientPort, RateLimiterPort};
use veg_crawler::config::Config;
use veg_crawler::disguise::{BrowserDisguise, DisguisePolicy};
use veg_crawler::fetch::FetchEngine;
use veg_crawler::infra::http_client::ReqwestHttp;
use veg_crawler::infra::rate_limiter_adapter::RateLimiterAdapter;
use veg_crawler::pipeline::{Coordinator, RunReport};
use veg_crawler::queue::{AdminAction, CrawlQueue, SqliteQueueStore};
use veg_crawler::rate_limiter::RateLimiter;
use veg_crawler::server::{self, AppState};
use veg_crawler::storage::{RecordSink, SqliteRecordSink};
use veg_crawler::types::{normalize_path, Location, LocationSeed, WorkState};
use veg_crawler::worker::{HttpClientFactory, WorkerPool, WorkerSettings};
use veg_crawler::{logging, metrics};

#[derive(Parser)]
#[command(name = "veg_crawler")]
#[command(about = "Crawl queue and venue extractor for paginated vegan/vegetarian listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP trigger/admin server
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run the worker pool against the queue
    Work {
        #[arg(long)]
        workers: Option<usize>,
        /// Exit once nothing is pending
        #[arg(long)]
        drain: bool,
    },
    /// Crawl one location now
    Scrape {
        /// Location path, e.g. north_america/usa/texas/dallas
        path: String,
    },
    /// Inspect and administer the crawl queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Bulk upsert locations from a JSON array of discovery rows
    Load { file: PathBuf },
    /// List work items, optionally filtered by state
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Overwrite an item's status: pending, skip or reset
    Set { path: String, action: String },
    /// Requeue failed items still under the retry cap
    Requeue,
    /// Item counts per state
    Stats,
}

/// Process-wide collaborators built once from config.
struct Runtime {
    config: Config,
    queue: CrawlQueue,
    sink: Arc<dyn RecordSink>,
    limiter: Arc<dyn RateLimiterPort>,
    disguise: Arc<dyn DisguisePolicy>,
}

impl Runtime {
    fn new(config: Config) -> anyhow::Result<Self> {
        let db_path = &config.queue.database_path;
        let store = SqliteQueueStore::open(db_path)
            .with_context(|| format!("opening queue database at {db_path}"))?;
        let sink = SqliteRecordSink::open(db_path)
            .with_context(|| format!("opening record database at {db_path}"))?;
        let queue = CrawlQueue::new(Arc::new(store), config.queue.max_retries)
            .with_stale_after(Duration::from_secs(config.queue.stale_after_secs));
        let limiter = RateLimiterAdapter(RateLimiter::new(config.rate_limit.requests_per_min));
        let disguise = BrowserDisguise::new(config.disguise.clone(), &config.crawler.base_url);
        Ok(Self {
            queue,
            sink: Arc::new(sink),
            limiter: Arc::new(limiter),
            disguise: Arc::new(disguise),
            config,
        })
    }

    fn http_factory(&self) -> HttpClientFactory {
        let timeout = Duration::from_secs(self.config.crawler.request_timeout_secs);
        Arc::new(move || -> veg_crawler::error::Result<Arc<dyn HttpClientPort>> {
            let client: Arc<dyn HttpClientPort> = Arc::new(ReqwestHttp::new(timeout)?);
            Ok(client)
        })
    }

    fn coordinator(&self) -> anyhow::Result<Coordinator> {
        let http = (self.http_factory())().context("building HTTP client")?;
        let fetcher = FetchEngine::new(http, self.limiter.clone(), self.disguise.clone(), &self.config.crawler);
        Ok(Coordinator::new(self.queue.clone(), fetcher, self.sink.clone()))
    }
}

/// Token cancelled on Ctrl-C.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });
    shutdown
}

fn print_report(report: &RunReport) {
    let icon = if report.success { "✅" } else { "❌" };
    println!("\n{icon} Run {} for {}", report.run_id, report.location_path);
    println!("   Outcome:   {}", report.terminal_state.as_str());
    println!("   Records:   {}", report.record_count);
    println!("   Pages:     {}", report.pages_fetched);
    println!("   Discarded: {}", report.discarded);
    if let Some(state) = report.item_state {
        println!("   Item:      {state}");
    }
    if let Some(err) = &report.error {
        println!("   Error:     {err}");
    }
    println!("   Duration:  {} ms", report.duration_ms);
}

async fn run_queue_command(runtime: &Runtime, command: QueueCommands) -> anyhow::Result<()> {
    let queue = &runtime.queue;
    match command {
        QueueCommands::Load { file } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let seeds: Vec<LocationSeed> = serde_json::from_str(&content)
                .with_context(|| format!("parsing {}", file.display()))?;
            let mut locations = Vec::with_capacity(seeds.len());
            for seed in seeds {
                let path = seed.path.clone();
                match Location::try_from(seed) {
                    Ok(location) => locations.push(location),
                    Err(e) => println!("⚠️  Skipping {path}: {e}"),
                }
            }
            let summary = queue.upsert_locations(&locations).await?;
            println!("📥 Loaded {} new, {} updated", summary.inserted, summary.updated);
        }
        QueueCommands::List { status } => {
            let filter = status.as_deref().map(str::parse::<WorkState>).transpose()?;
            let items = queue.list(filter).await?;
            for item in &items {
                let stored = runtime.sink.count_for_location(item.path()).await?;
                println!(
                    "{:<10} {:<7} retries={} entries={:<6} stored={:<6} {}{}",
                    item.state.as_str(),
                    item.location.priority.as_str(),
                    item.retry_count,
                    item.location.expected_entries,
                    stored,
                    item.path(),
                    item.last_error.as_deref().map(|e| format!("  ({e})")).unwrap_or_default()
                );
            }
            println!("{} item(s)", items.len());
        }
        QueueCommands::Set { path, action } => {
            let action: AdminAction = action.parse()?;
            let path = normalize_path(&path)?;
            if queue.set_status(&path, action).await? {
                println!("✅ {path} updated");
            } else {
                println!("⚠️  {path}: transition refused");
            }
        }
        QueueCommands::Requeue => {
            let paths = queue.requeue_failed().await?;
            println!("🔁 Requeued {} item(s)", paths.len());
            for path in paths {
                println!("   {path}");
            }
        }
        QueueCommands::Stats => {
            let stats = queue.stats().await?;
            println!("📊 {} item(s)", stats.total);
            for (state, count) in &stats.by_state {
                println!("   {state:<10} {count}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    let runtime = Runtime::new(config)?;

    match cli.command {
        Commands::Serve { port } => {
            metrics::init_metrics();
            let port = port.unwrap_or(runtime.config.server.port);
            let state = AppState {
                coordinator: Arc::new(runtime.coordinator()?),
                queue: runtime.queue.clone(),
                sink: runtime.sink.clone(),
                shutdown: shutdown_on_ctrl_c(),
            };
            server::start_server(state, port).await?;
        }
        Commands::Work { workers, drain } => {
            metrics::init_metrics();
            let cfg = &runtime.config.workers;
            let settings = WorkerSettings {
                count: workers.unwrap_or(cfg.count),
                poll_interval: Duration::from_millis(cfg.poll_interval_ms),
                auto_requeue: cfg.auto_requeue,
                drain,
            };
            let pool = WorkerPool::new(
                settings,
                runtime.config.crawler.clone(),
                runtime.queue.clone(),
                runtime.sink.clone(),
                runtime.limiter.clone(),
                runtime.disguise.clone(),
                runtime.http_factory(),
            );

            let stats = pool.run(shutdown_on_ctrl_c()).await?;
            println!(
                "\n📊 Worker runs: {} ({} succeeded, {} failed, {} refused)",
                stats.runs, stats.succeeded, stats.failed, stats.refused
            );
        }
        Commands::Scrape { path } => {
            let path = normalize_path(&path)?;
            println!("🕷️  Crawling {path}...");
            let report = runtime.coordinator()?.trigger(&path, &shutdown_on_ctrl_c()).await;
            print_report(&report);
            if !report.success {
                error!(path = %path, "crawl did not complete");
            }
        }
        Commands::Queue { command } => run_queue_command(&runtime, command).await?,
    }
    Ok(())
}
