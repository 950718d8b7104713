use crate::{
    format_duration, CaptureBackend, CaptureResult, CaptureService, ChromiumBackend, Config,
    Metrics, MetricsSnapshot, ProgressTracker, ResultSink, UrlBacklog, WorkerPool,
};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "screenshooter")]
#[command(about = "Capture screenshots and HTTP metadata for a list of URLs")]
#[command(version)]
pub struct Cli {
    #[arg(short = 'o', long, help = "Directory the screenshots are written to")]
    pub output_dir: PathBuf,

    #[arg(short = 'u', long, num_args = 1.., help = "URLs to capture")]
    pub urls: Vec<String>,

    #[arg(short = 'U', long, num_args = 1.., help = "Files with one URL per line")]
    pub urls_file: Vec<PathBuf>,

    #[arg(short = 'n', long, help = "Number of concurrent workers [default: 5]")]
    pub num_concurrent: Option<usize>,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Viewport width")]
    pub width: Option<u32>,

    #[arg(long, help = "Viewport height")]
    pub height: Option<u32>,

    #[arg(long, help = "Capture the full scrollable page")]
    pub full_page: bool,

    #[arg(long, help = "Do not print the JSON results on stdout")]
    pub no_json: bool,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

/// Builds the effective configuration: JSON file first, flags on top.
pub async fn load_config(args: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let content = fs::read_to_string(config_path)
            .await
            .with_context(|| format!("failed to read config file {}", config_path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file {}", config_path.display()))?
    } else {
        Config::default()
    };

    config.output_dir = args.output_dir.clone();

    if let Some(num_concurrent) = args.num_concurrent {
        config.num_concurrent = num_concurrent;
    }
    if let Some(chrome_path) = &args.chrome_path {
        config.chrome_path = Some(chrome_path.clone());
    }
    if let Some(width) = args.width {
        config.viewport.width = width;
    }
    if let Some(height) = args.height {
        config.viewport.height = height;
    }
    if args.full_page {
        config.full_page = true;
    }
    if args.no_json {
        config.emit_json = false;
    }

    config.validate()?;

    debug!("Workers: {}", config.num_concurrent);
    debug!("Navigation timeout: {:?}", config.navigation_timeout);
    debug!("Retry delay: {:?}", config.retry_delay);
    Ok(config)
}

#[derive(Debug)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed: Duration,
    pub metrics: MetricsSnapshot,
    pub results: Vec<CaptureResult>,
}

pub struct CliRunner {
    pub config: Config,
    urls: Vec<String>,
    url_files: Vec<PathBuf>,
}

impl CliRunner {
    pub async fn new(args: &Cli) -> Result<Self> {
        let config = load_config(args).await?;

        Ok(Self {
            config,
            urls: args.urls.clone(),
            url_files: args.urls_file.clone(),
        })
    }

    pub fn with_config(config: Config, urls: Vec<String>, url_files: Vec<PathBuf>) -> Self {
        Self {
            config,
            urls,
            url_files,
        }
    }

    /// Full run against a freshly launched Chromium.
    pub async fn run(&self) -> Result<RunSummary> {
        let (sink, backlog) = self.prepare().await?;

        let backend = ChromiumBackend::launch(&self.config)
            .await
            .context("failed to start the browser")?;

        self.execute(Arc::new(backend), sink, backlog).await
    }

    /// Same as [`CliRunner::run`] with a caller-supplied backend.
    pub async fn run_with_backend(&self, backend: Arc<dyn CaptureBackend>) -> Result<RunSummary> {
        let (sink, backlog) = self.prepare().await?;
        self.execute(backend, sink, backlog).await
    }

    /// Output directory first, then the backlog. Either failing ends the run.
    async fn prepare(&self) -> Result<(ResultSink, UrlBacklog)> {
        let sink = ResultSink::open(&self.config.output_dir).await?;
        let backlog = UrlBacklog::from_sources(&self.urls, &self.url_files).await?;

        Ok((sink, backlog))
    }

    async fn execute(
        &self,
        backend: Arc<dyn CaptureBackend>,
        sink: ResultSink,
        backlog: UrlBacklog,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        let total = backlog.total();

        let metrics = Arc::new(Metrics::new());
        let service = Arc::new(CaptureService::new(backend, &self.config, metrics.clone()));
        let sink = Arc::new(sink);
        let progress = Arc::new(ProgressTracker::new(total));

        let pool = WorkerPool::new(&self.config, service.clone(), sink.clone(), progress.clone());
        pool.run(Arc::new(backlog)).await;
        drop(pool);

        service.shutdown().await;

        let results = Arc::try_unwrap(sink)
            .map_err(|_| anyhow!("result sink still in use after the workers finished"))?
            .into_results();

        if self.config.emit_json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }

        let progress = progress.get_progress();
        let summary = RunSummary {
            total,
            succeeded: progress.success,
            failed: progress.errors,
            elapsed: start.elapsed(),
            metrics: metrics.snapshot(),
            results,
        };

        info!(
            "Captured {}/{} URLs in {} ({} failed, {} blank retries)",
            summary.succeeded,
            summary.total,
            format_duration(summary.elapsed),
            summary.failed,
            summary.metrics.blank_retries
        );
        Ok(summary)
    }
}

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow!(e))?;

    Ok(())
}
