//! Shared backlog of URLs waiting to be captured
//!
//! The backlog is filled once before any worker starts and is then drained
//! destructively. Each stored URL is handed out exactly once.

use crate::CaptureError;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct UrlBacklog {
    urls: Mutex<Vec<String>>,
    total: usize,
}

impl UrlBacklog {
    /// Builds a backlog from already-collected URL strings.
    ///
    /// Entries are trimmed, empty ones dropped and duplicates collapsed.
    pub fn new<I, S>(candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut urls = Vec::new();

        for candidate in candidates {
            let trimmed = candidate.as_ref().trim();
            if !trimmed.is_empty() && seen.insert(trimmed.to_string()) {
                urls.push(trimmed.to_string());
            }
        }

        let total = urls.len();
        Self {
            urls: Mutex::new(urls),
            total,
        }
    }

    /// Merges URL-list files and explicit URLs into one deduplicated backlog.
    pub async fn from_sources<P>(urls: &[String], url_files: &[P]) -> Result<Self, CaptureError>
    where
        P: AsRef<Path>,
    {
        let mut candidates = Vec::new();

        for path in url_files {
            let path = path.as_ref();
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                CaptureError::ConfigurationError(format!(
                    "Failed to read URL file {}: {}",
                    path.display(),
                    e
                ))
            })?;

            let before = candidates.len();
            candidates.extend(content.lines().map(str::to_string));
            debug!(
                "Read {} lines from {}",
                candidates.len() - before,
                path.display()
            );
        }

        candidates.extend(urls.iter().cloned());

        let backlog = Self::new(candidates);
        info!("Backlog holds {} distinct URLs", backlog.total());
        Ok(backlog)
    }

    /// Removes and returns one URL, or `None` once the backlog is drained.
    ///
    /// No ordering is promised between calls.
    pub fn pop(&self) -> Option<String> {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    /// Number of URLs the backlog was created with.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.urls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
