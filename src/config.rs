//! Configuration and capture record types
//!
//! This module holds the run configuration, the per-URL request type handed to
//! workers, and the structured record produced for every successful capture.

use crate::{validate_url, CaptureError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Main configuration structure for the screenshooter
///
/// Values load from an optional JSON file and are then overridden by
/// command-line flags.
///
/// # Examples
///
/// ```rust
/// use screenshooter::Config;
///
/// let config = Config {
///     num_concurrent: 10,
///     ..Default::default()
/// };
/// assert_eq!(config.blank_threshold, 15);
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Directory the PNG files are written into (default: current directory)
    pub output_dir: PathBuf,

    /// Number of workers draining the backlog concurrently (default: 5)
    pub num_concurrent: usize,

    /// Hard limit for a navigation to reach the `load` milestone (default: 3800 ms)
    pub navigation_timeout: Duration,

    /// Pause before the single re-capture of a likely blank frame (default: 5000 ms)
    ///
    /// Gives late-rendering pages a chance to paint before the second shot.
    pub retry_delay: Duration,

    /// Side length of the square thumbnail used by the blank-frame check (default: 9)
    pub thumbnail_size: u32,

    /// Distinct greyscale values below which a frame counts as blank (default: 15)
    pub blank_threshold: usize,

    /// Browser viewport used for every capture
    pub viewport: Viewport,

    /// Capture the whole scrollable page instead of the viewport (default: false)
    pub full_page: bool,

    /// Path to Chrome/Chromium executable (default: auto-detect)
    pub chrome_path: Option<String>,

    /// Custom User-Agent string for requests (default: Chrome default)
    pub user_agent: Option<String>,

    /// Print the JSON array of results on stdout once the run finishes (default: true)
    pub emit_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            num_concurrent: 5,
            navigation_timeout: Duration::from_millis(3800),
            retry_delay: Duration::from_millis(5000),
            thumbnail_size: 9,
            blank_threshold: 15,
            viewport: Viewport::default(),
            full_page: false,
            chrome_path: None,
            user_agent: None,
            emit_json: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), CaptureError> {
        if self.num_concurrent == 0 {
            return Err(CaptureError::ConfigurationError(
                "Number of concurrent workers must be greater than 0".to_string(),
            ));
        }

        if self.navigation_timeout.is_zero() {
            return Err(CaptureError::ConfigurationError(
                "Navigation timeout must be greater than 0".to_string(),
            ));
        }

        if self.thumbnail_size == 0 {
            return Err(CaptureError::ConfigurationError(
                "Thumbnail size must be greater than 0".to_string(),
            ));
        }

        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(CaptureError::ConfigurationError(
                "Viewport dimensions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Browser viewport configuration for screenshots
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Viewport {
    /// Viewport width in pixels (default: 1280)
    pub width: u32,

    /// Viewport height in pixels (default: 720)
    pub height: u32,

    /// Device pixel ratio (default: 1.0)
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            device_scale_factor: 1.0,
        }
    }
}

/// A single URL handed to a worker.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: String,
    pub url: Url,
}

impl CaptureRequest {
    /// Parses a backlog entry. Only `http` and `https` URLs are accepted.
    pub fn parse(raw: &str) -> Result<Self, CaptureError> {
        let url = validate_url(raw)?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            url,
        })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Explicit port, or 80/443 by scheme.
    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.scheme() == "https" { 443 } else { 80 })
    }
}

/// Metadata of the request that produced the primary navigation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestMeta {
    pub headers: BTreeMap<String, String>,
    pub method: String,
    pub post_data: Option<String>,
    /// URL actually requested after redirects
    pub url: String,
}

/// Metadata of the primary navigation response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseMeta {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub status_text: String,
    #[serde(serialize_with = "serialize_base64")]
    pub response_data: Vec<u8>,
}

impl ResponseMeta {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Structured record for one successfully captured URL.
///
/// Only ever built once navigation, screenshot and metadata extraction all
/// succeeded; there is no partially populated variant.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureResult {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub request: RequestMeta,
    pub response: ResponseMeta,
    #[serde(serialize_with = "serialize_base64")]
    pub screenshot_data: Vec<u8>,
    /// Set when the blank-frame check triggered the single re-capture
    pub retried: bool,
}

fn serialize_base64<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use base64::Engine as _;
    serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Generate Chrome command-line arguments based on configuration
///
/// # Examples
///
/// ```rust
/// use screenshooter::{Config, get_chrome_args};
///
/// let args = get_chrome_args(&Config::default());
/// assert!(args.contains(&"--ignore-certificate-errors".to_string()));
/// ```
pub fn get_chrome_args(config: &Config) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-gpu".to_string(),
        "--disable-extensions".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-sync".to_string(),
        "--no-first-run".to_string(),
        "--hide-scrollbars".to_string(),
        "--ignore-certificate-errors".to_string(),
        "--ignore-ssl-errors".to_string(),
        format!(
            "--window-size={},{}",
            config.viewport.width, config.viewport.height
        ),
    ];

    if let Some(user_agent) = &config.user_agent {
        args.push(format!("--user-agent={user_agent}"));
    }

    args
}

pub fn create_browser_config(
    config: &Config,
) -> Result<chromiumoxide::browser::BrowserConfig, CaptureError> {
    use chromiumoxide::browser::BrowserConfig;

    let mut builder = BrowserConfig::builder()
        .window_size(config.viewport.width, config.viewport.height)
        .args(get_chrome_args(config));

    if let Some(chrome_path) = &config.chrome_path {
        builder = builder.chrome_executable(chrome_path);
    }

    builder.build().map_err(CaptureError::BrowserLaunchFailed)
}
