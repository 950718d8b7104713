use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Navigation timeout after {0:?}")]
    NavigationTimeout(Duration),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("Browsing context error: {0}")]
    ContextFailed(String),

    #[error("Screenshot capture failed: {0}")]
    ScreenshotFailed(String),

    #[error("Response metadata unavailable: {0}")]
    MetadataUnavailable(String),

    #[error("Blank-frame check failed: {0}")]
    BlankCheckFailed(String),

    #[error("Browser launch failed: {0}")]
    BrowserLaunchFailed(String),

    #[error("Output directory unusable: {0}")]
    OutputDirectory(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Where in the pipeline an error arose.
///
/// Everything but [`ErrorKind::Fatal`] is isolated to the URL being captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Navigation,
    Capture,
    Heuristic,
    Fatal,
}

impl CaptureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaptureError::InvalidUrl(_)
            | CaptureError::NavigationTimeout(_)
            | CaptureError::NavigationFailed(_) => ErrorKind::Navigation,
            CaptureError::BlankCheckFailed(_) => ErrorKind::Heuristic,
            CaptureError::BrowserLaunchFailed(_)
            | CaptureError::OutputDirectory(_)
            | CaptureError::ConfigurationError(_) => ErrorKind::Fatal,
            CaptureError::ContextFailed(_)
            | CaptureError::ScreenshotFailed(_)
            | CaptureError::MetadataUnavailable(_)
            | CaptureError::IoError(_)
            | CaptureError::SerializationError(_) => ErrorKind::Capture,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for CaptureError {
    fn from(err: serde_json::Error) -> Self {
        CaptureError::SerializationError(err.to_string())
    }
}

impl From<image::ImageError> for CaptureError {
    fn from(err: image::ImageError) -> Self {
        CaptureError::BlankCheckFailed(err.to_string())
    }
}
