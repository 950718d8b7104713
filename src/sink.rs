//! Result sink
//!
//! Writes each accepted screenshot to `{host}_{scheme}_{port}.png` inside the
//! output directory and keeps the structured records for the final dump.
//! Two URLs sharing host, scheme and port write the same file; the last write
//! wins.

use crate::{sanitize_filename, CaptureError, CaptureRequest, CaptureResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct ResultSink {
    output_dir: PathBuf,
    results: Mutex<Vec<CaptureResult>>,
}

impl ResultSink {
    /// Prepares the output directory. Failure here aborts the whole run.
    pub async fn open(output_dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let output_dir = output_dir.as_ref().to_path_buf();

        fs::create_dir_all(&output_dir).await.map_err(|e| {
            CaptureError::OutputDirectory(format!("{}: {}", output_dir.display(), e))
        })?;

        let metadata = fs::metadata(&output_dir).await.map_err(|e| {
            CaptureError::OutputDirectory(format!("{}: {}", output_dir.display(), e))
        })?;
        if metadata.permissions().readonly() {
            return Err(CaptureError::OutputDirectory(format!(
                "{}: directory is read-only",
                output_dir.display()
            )));
        }

        info!("Writing screenshots to {}", output_dir.display());
        Ok(Self {
            output_dir,
            results: Mutex::new(Vec::new()),
        })
    }

    /// Deterministic file name for a captured URL.
    pub fn output_filename(request: &CaptureRequest) -> String {
        sanitize_filename(&format!(
            "{}_{}_{}.png",
            request.host(),
            request.scheme(),
            request.port()
        ))
    }

    /// Persists the screenshot and records the result.
    ///
    /// The record is only kept once the image is on disk.
    pub async fn accept(
        &self,
        request: &CaptureRequest,
        result: CaptureResult,
    ) -> Result<PathBuf, CaptureError> {
        let path = self.output_dir.join(Self::output_filename(request));

        fs::write(&path, &result.screenshot_data).await?;
        debug!(
            "Saved {} bytes for {} to {}",
            result.screenshot_data.len(),
            result.url,
            path.display()
        );

        self.results.lock().await.push(result);
        Ok(path)
    }

    pub async fn len(&self) -> usize {
        self.results.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn into_results(self) -> Vec<CaptureResult> {
        self.results.into_inner()
    }
}
