use crate::{CaptureError, CaptureRequest, CaptureService, Config, ResultSink, UrlBacklog};
use colored::Colorize;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub struct CaptureWorker {
    id: usize,
    service: Arc<CaptureService>,
    sink: Arc<ResultSink>,
    progress: Arc<ProgressTracker>,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl CaptureWorker {
    pub fn new(
        id: usize,
        service: Arc<CaptureService>,
        sink: Arc<ResultSink>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            id,
            service,
            sink,
            progress,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Drains the backlog until it is empty. A failed URL never stops the loop.
    pub async fn run(&self, backlog: Arc<UrlBacklog>) {
        debug!("Starting capture worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        while let Some(url) = backlog.pop() {
            let label = self.progress.dispatch();
            let started = Instant::now();

            let outcome = self.process(&url).await;
            self.service
                .metrics()
                .record_capture(started.elapsed(), outcome.is_ok());

            match outcome {
                Ok(path) => {
                    self.processed_count.fetch_add(1, Ordering::Relaxed);
                    self.progress.record_completion(true);
                    debug!("Worker {} saved {} to {}", self.id, url, path.display());
                    println!("{}", success_line(&label, &url));
                }
                Err(e) => {
                    self.error_count.fetch_add(1, Ordering::Relaxed);
                    self.progress.record_completion(false);
                    warn!("Worker {} failed to capture {}: {}", self.id, url, e);
                    eprintln!("{}", failure_line(&label, &url, &e));
                }
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        debug!("Capture worker {} found the backlog empty", self.id);
    }

    async fn process(&self, url: &str) -> Result<PathBuf, CaptureError> {
        let request = CaptureRequest::parse(url)?;
        let result = self.service.capture(&request).await?;
        self.sink.accept(&request, result).await
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running.load(Ordering::Relaxed),
            processed_count: self.processed_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }
}

/// `[NNN/TOTAL] url` with the URL in green.
pub fn success_line(label: &str, url: &str) -> String {
    format!("[{label}] {}", url.green())
}

/// `[NNN/TOTAL] url: error` in yellow.
pub fn failure_line(label: &str, url: &str, error: &CaptureError) -> String {
    format!("[{label}] {}", format!("{url}: {error}").yellow())
}

impl Clone for CaptureWorker {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            service: self.service.clone(),
            sink: self.sink.clone(),
            progress: self.progress.clone(),
            is_running: self.is_running.clone(),
            processed_count: self.processed_count.clone(),
            error_count: self.error_count.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Fixed-size set of workers competing for backlog items.
pub struct WorkerPool {
    workers: Vec<CaptureWorker>,
    progress: Arc<ProgressTracker>,
}

impl WorkerPool {
    pub fn new(
        config: &Config,
        service: Arc<CaptureService>,
        sink: Arc<ResultSink>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        let workers = (0..config.num_concurrent)
            .map(|id| CaptureWorker::new(id, service.clone(), sink.clone(), progress.clone()))
            .collect();

        Self { workers, progress }
    }

    /// Runs every worker to completion.
    ///
    /// Returns once each worker has independently observed an empty backlog.
    pub async fn run(&self, backlog: Arc<UrlBacklog>) {
        info!(
            "Capturing {} URLs with {} workers",
            backlog.total(),
            self.workers.len()
        );

        let handles: Vec<_> = self
            .workers
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let backlog = backlog.clone();
                tokio::spawn(async move { worker.run(backlog).await })
            })
            .collect();

        for (id, joined) in join_all(handles).await.into_iter().enumerate() {
            if let Err(e) = joined {
                error!("Capture worker {} aborted: {}", id, e);
            }
        }

        let progress = self.progress.get_progress();
        info!(
            "All workers finished. Success: {}, Errors: {}",
            progress.success, progress.errors
        );
    }

    pub fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.get_stats()).collect()
    }

    pub fn total_processed(&self) -> usize {
        self.workers.iter().map(|w| w.get_stats().processed_count).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.workers.iter().map(|w| w.get_stats().error_count).sum()
    }
}

/// Progress counters shared by the workers.
///
/// Display only: nothing here decides which URL is processed.
pub struct ProgressTracker {
    total: usize,
    dispatched: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            dispatched: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    /// Counts one more dispatched URL and returns its `NNN/TOTAL` label.
    pub fn dispatch(&self) -> String {
        let ordinal = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        let width = self.total.to_string().len().max(3);
        format!("{ordinal:0width$}/{}", self.total)
    }

    pub fn record_completion(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_progress(&self) -> ProgressInfo {
        let completed = self.completed.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);

        ProgressInfo {
            total: self.total,
            dispatched: self.dispatched.load(Ordering::Relaxed),
            completed,
            errors,
            success: completed - errors,
            elapsed: self.start_time.elapsed(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Relaxed) >= self.total
    }
}

#[derive(Debug, Clone)]
pub struct ProgressInfo {
    pub total: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub errors: usize,
    pub success: usize,
    pub elapsed: Duration,
}
