//! # Screenshooter
//!
//! Bulk web screenshot collector. Given a set of URLs it drives one shared
//! headless Chromium, captures a PNG of each page together with the request and
//! response metadata of the main document, and writes one file per
//! scheme/host/port into an output directory.
//!
//! ## How a run works
//!
//! - URLs from `--urls` and `--urls-file` are merged into a deduplicated backlog
//! - A fixed pool of workers pops URLs until the backlog is empty
//! - Each capture runs in its own browsing context with cookies cleared, a
//!   3.8 second navigation limit and a guaranteed context close
//! - A likely blank frame (fewer than 15 grey levels in a 9x9 thumbnail of a
//!   2xx page) is re-captured once after 5 seconds
//! - Results are written as `{host}_{scheme}_{port}.png` and dumped as JSON on
//!   stdout at the end
//!
//! A failed URL never stops the run. Only startup problems (browser launch,
//! output directory, unreadable URL file, invalid configuration) are fatal.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenshooter::{CaptureRequest, CaptureService, ChromiumBackend, Config, Metrics};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let backend = Arc::new(ChromiumBackend::launch(&config).await?);
//!     let service = CaptureService::new(backend, &config, Arc::new(Metrics::new()));
//!
//!     let result = service.capture(&CaptureRequest::parse("https://example.com")?).await?;
//!     println!("{}: HTTP {}", result.url, result.response.status);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! screenshooter -o shots/ -u https://example.com http://example.org:8080
//! screenshooter -o shots/ -U hosts.txt -n 20 --no-json
//! ```

/// Configuration and capture record types
pub mod config;

/// Error types and error classification
pub mod error;

/// Deduplicated, shared URL backlog
pub mod backlog;

/// Blank-frame heuristic
pub mod blank;

/// Browser backend abstraction and the Chromium implementation
pub mod browser;

/// Per-URL capture protocol
pub mod capture;

/// Worker pool draining the backlog
pub mod worker;

/// Screenshot files and collected results
pub mod sink;

/// Command-line interface implementation
pub mod cli;

/// Capture counters
pub mod metrics;

/// Utility functions and helpers
pub mod utils;

#[cfg(test)]
mod testutil;

#[cfg(test)]
mod tests;

pub use backlog::*;
pub use blank::*;
pub use browser::*;
pub use capture::*;
pub use cli::*;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use sink::*;
pub use utils::*;
pub use worker::*;
