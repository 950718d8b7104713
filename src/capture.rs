//! Per-URL capture protocol
//!
//! This module provides the `CaptureService` which runs one URL through the
//! full protocol: open a context, clear cookies, navigate with a hard timeout,
//! screenshot, collect request/response metadata, check for a blank frame and
//! re-capture at most once. The context is closed on every exit path.

use crate::{
    BlankFrameDetector, BrowsingContext, CaptureBackend, CaptureError, CaptureRequest,
    CaptureResult, Config, Metrics, NavigationResponse, RequestMeta, ResponseMeta,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Runs the capture protocol against a shared backend.
///
/// # Examples
///
/// ```rust,no_run
/// use screenshooter::{CaptureRequest, CaptureService, ChromiumBackend, Config, Metrics};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let backend = Arc::new(ChromiumBackend::launch(&config).await?);
///     let service = CaptureService::new(backend.clone(), &config, Arc::new(Metrics::new()));
///
///     let request = CaptureRequest::parse("https://example.com")?;
///     let result = service.capture(&request).await?;
///     println!("{} -> {} bytes", result.url, result.screenshot_data.len());
///     Ok(())
/// }
/// ```
pub struct CaptureService {
    backend: Arc<dyn CaptureBackend>,
    detector: BlankFrameDetector,
    navigation_timeout: Duration,
    retry_delay: Duration,
    metrics: Arc<Metrics>,
}

impl CaptureService {
    pub fn new(backend: Arc<dyn CaptureBackend>, config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            backend,
            detector: BlankFrameDetector::from_config(config),
            navigation_timeout: config.navigation_timeout,
            retry_delay: config.retry_delay,
            metrics,
        }
    }

    /// Runs the protocol for one URL.
    ///
    /// Capture outcomes are not counted here; the caller records them once the
    /// result has also been persisted.
    pub async fn capture(&self, request: &CaptureRequest) -> Result<CaptureResult, CaptureError> {
        let timestamp = Utc::now();

        let mut context = self.backend.new_context().await?;
        let outcome = self
            .capture_in_context(context.as_mut(), request, timestamp)
            .await;

        if let Err(e) = context.close().await {
            warn!("Failed to close browsing context for {}: {}", request.url, e);
        }

        outcome
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    async fn capture_in_context(
        &self,
        context: &mut dyn BrowsingContext,
        request: &CaptureRequest,
        timestamp: DateTime<Utc>,
    ) -> Result<CaptureResult, CaptureError> {
        context.clear_cookies().await?;

        debug!("Capture {} navigating to {}", request.id, request.url);
        let navigation = context
            .navigate(&request.url, self.navigation_timeout)
            .await?;

        let first_frame = context.screenshot().await?;
        let body = context.response_body(&navigation).await?;
        let (request_meta, response_meta) = split_navigation(navigation, body);

        let (screenshot_data, retried) = self
            .settle_frame(context, request, &response_meta, first_frame)
            .await?;

        Ok(CaptureResult {
            url: request.url.to_string(),
            timestamp,
            request: request_meta,
            response: response_meta,
            screenshot_data,
            retried,
        })
    }

    /// Applies the blank-frame check and the single bounded re-capture.
    ///
    /// The second frame is used as-is, blank or not.
    async fn settle_frame(
        &self,
        context: &mut dyn BrowsingContext,
        request: &CaptureRequest,
        response: &ResponseMeta,
        first_frame: Vec<u8>,
    ) -> Result<(Vec<u8>, bool), CaptureError> {
        if !response.is_success() || !self.detector.is_likely_blank(&first_frame)? {
            return Ok((first_frame, false));
        }

        debug!(
            "Capture {} looks blank, re-capturing {} after {:?}",
            request.id, request.url, self.retry_delay
        );
        self.metrics.record_retry();
        sleep(self.retry_delay).await;

        let second_frame = context.screenshot().await?;
        Ok((second_frame, true))
    }

    pub async fn shutdown(&self) {
        self.backend.close().await;
    }
}

fn split_navigation(navigation: NavigationResponse, body: Vec<u8>) -> (RequestMeta, ResponseMeta) {
    let response = ResponseMeta {
        ip: navigation.ip,
        port: navigation.port,
        url: navigation.url,
        headers: navigation.headers,
        status: navigation.status,
        status_text: navigation.status_text,
        response_data: body,
    };

    (navigation.request, response)
}
