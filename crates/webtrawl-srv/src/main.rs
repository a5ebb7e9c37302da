use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use webtrawl::api::{self, ApiState};
use webtrawl::consumers::start_consumers;
use webtrawl::control::ControlPlane;
use webtrawl::maintenance::Maintenance;
use webtrawl::worker::Worker;
use webtrawl_core::{Config, QueueBus, Repository};
use webtrawl_local::{ChromiumRenderer, MemoryQueueBus, RecordStore};

#[derive(Parser, Debug)]
#[command(name = "webtrawl")]
#[command(about = "Queue-driven browser scraping service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the control plane: HTTP API, result consumers, stale sweeper.
    Serve(ServeCmd),
    /// Run the worker plane: headless browser plus request consumers.
    Work,
    /// Run both planes in one process over the in-memory bus (dev/demo).
    Standalone(ServeCmd),
    /// Diagnose configuration and browser availability (json; no secrets).
    Doctor,
    /// Print version info.
    Version,
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    /// Listen address for the HTTP API.
    #[arg(long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(cmd) => serve(cmd).await,
        Commands::Work => work().await,
        Commands::Standalone(cmd) => standalone(cmd).await,
        Commands::Doctor => doctor(),
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "webtrawl",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
            Ok(())
        }
    }
}

fn open_store(cfg: &Config) -> Result<Arc<dyn Repository>> {
    let store = match &cfg.data_dir {
        Some(dir) => RecordStore::open(dir.clone())
            .with_context(|| format!("opening record store at {}", dir.display()))?,
        None => {
            tracing::warn!("WEBTRAWL_DATA_DIR is not set; records are in-memory only");
            RecordStore::in_memory()
        }
    };
    Ok(Arc::new(store))
}

#[cfg(feature = "amqp")]
async fn broker_bus(cfg: &Config) -> Result<Arc<dyn QueueBus>> {
    let bus = webtrawl_local::amqp::AmqpQueueBus::connect(&cfg.amqp_url, cfg.message_ttl)
        .await
        .context("connecting to the AMQP broker")?;
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "amqp"))]
async fn broker_bus(_cfg: &Config) -> Result<Arc<dyn QueueBus>> {
    anyhow::bail!(
        "this build has no AMQP support; rebuild with `--features amqp` or use `standalone`"
    )
}

async fn serve(cmd: ServeCmd) -> Result<()> {
    let cfg = Config::from_env();
    let addr = cmd.addr.unwrap_or_else(|| cfg.http_addr.clone());
    let repo = open_store(&cfg)?;
    let bus = broker_bus(&cfg).await?;

    start_consumers(repo.clone(), bus.clone(), cfg.clone()).await?;
    let maintenance = Arc::new(Maintenance::new(repo.clone(), cfg.clone()));
    maintenance.clone().spawn_sweeper();
    let control = Arc::new(ControlPlane::new(repo.clone(), bus, cfg));

    api::serve(
        &addr,
        ApiState {
            control,
            repo,
            maintenance,
        },
    )
    .await
    .context("http api server")
}

async fn work() -> Result<()> {
    let cfg = Config::from_env();
    let bus = broker_bus(&cfg).await?;
    let renderer = Arc::new(
        ChromiumRenderer::launch(&cfg)
            .await
            .context("launching the headless browser")?,
    );
    Worker::new(bus, renderer, cfg).start().await?;
    tracing::info!("worker consuming scrape requests");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    Ok(())
}

async fn standalone(cmd: ServeCmd) -> Result<()> {
    let cfg = Config::from_env();
    let addr = cmd.addr.unwrap_or_else(|| cfg.http_addr.clone());
    let repo = open_store(&cfg)?;
    let bus: Arc<dyn QueueBus> = Arc::new(MemoryQueueBus::new(cfg.message_ttl));

    start_consumers(repo.clone(), bus.clone(), cfg.clone()).await?;
    let renderer = Arc::new(
        ChromiumRenderer::launch(&cfg)
            .await
            .context("launching the headless browser")?,
    );
    Worker::new(bus.clone(), renderer, cfg.clone()).start().await?;
    let maintenance = Arc::new(Maintenance::new(repo.clone(), cfg.clone()));
    maintenance.clone().spawn_sweeper();
    let control = Arc::new(ControlPlane::new(repo.clone(), bus, cfg));

    api::serve(
        &addr,
        ApiState {
            control,
            repo,
            maintenance,
        },
    )
    .await
    .context("http api server")
}

fn doctor() -> Result<()> {
    let cfg = Config::from_env();
    let chromium = match &cfg.chromium_path {
        Some(path) => Some(path.clone()).filter(|p| p.exists()),
        None => webtrawl_local::browser::find_chromium(),
    };
    let report = serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "httpAddr": cfg.http_addr,
        "amqpConfigured": std::env::var_os("WEBTRAWL_AMQP_URL").is_some(),
        "dataDir": cfg.data_dir.as_ref().map(|p| p.display().to_string()),
        "scrapeIntervalMinutes": cfg.scrape_interval_minutes,
        "maxRetries": cfg.max_retries,
        "concurrentScrapers": cfg.concurrent_scrapers,
        "navTimeoutMs": cfg.nav_timeout.as_millis() as u64,
        "waitStrategy": cfg.wait_strategy.as_str(),
        "disableImages": cfg.disable_images,
        "disableCss": cfg.disable_css,
        "staleTimeoutMinutes": cfg.stale_timeout_minutes,
        "chromium": {
            "found": chromium.is_some(),
            "path": chromium.as_ref().map(|p| p.display().to_string()),
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
