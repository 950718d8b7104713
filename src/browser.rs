//! Browser backend used by the capture protocol
//!
//! One expensive backend instance is shared by every worker. Each capture
//! checks out a cheap [`BrowsingContext`] that lives for exactly one URL and
//! is closed afterwards. The traits keep the capture protocol independent of
//! Chromium so it can run against a simulated backend in tests.

use crate::{create_browser_config, CaptureError, Config, RequestMeta, Viewport};
use async_trait::async_trait;
use base64::Engine as _;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams, RequestId,
    ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::cdp::browser_protocol::storage::ClearCookiesParams;
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::{FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use url::Url;

/// Primary response of a completed navigation, as reported by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationResponse {
    pub request: RequestMeta,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub status: u16,
    pub status_text: String,
}

/// Shared rendering engine.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, CaptureError>;

    /// Releases the engine. Called once, after every worker has finished.
    async fn close(&self);
}

/// Short-lived browsing session used for a single capture.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrowsingContext: Send {
    async fn clear_cookies(&mut self) -> Result<(), CaptureError>;

    /// Navigates and waits for the `load` milestone, failing after `limit`.
    async fn navigate(
        &mut self,
        url: &Url,
        limit: Duration,
    ) -> Result<NavigationResponse, CaptureError>;

    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError>;

    async fn response_body(
        &mut self,
        response: &NavigationResponse,
    ) -> Result<Vec<u8>, CaptureError>;

    async fn close(&mut self) -> Result<(), CaptureError>;
}

/// Headless Chromium shared across all workers.
pub struct ChromiumBackend {
    browser: Arc<Mutex<Browser>>,
    handler: JoinHandle<Result<(), chromiumoxide::error::CdpError>>,
    viewport: Viewport,
    full_page: bool,
}

impl ChromiumBackend {
    pub async fn launch(config: &Config) -> Result<Self, CaptureError> {
        let browser_config = create_browser_config(config)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| CaptureError::BrowserLaunchFailed(e.to_string()))?;

        // The handler is a Stream and must be polled for any CDP command to complete
        let handler = tokio::spawn(async move {
            loop {
                match handler.next().await {
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("Handler error: {}", e);
                        return Err(e);
                    }
                    None => {
                        debug!("Handler stream ended");
                        break;
                    }
                }
            }
            Ok(())
        });

        info!(
            "Browser launched ({}x{})",
            config.viewport.width, config.viewport.height
        );

        Ok(Self {
            browser: Arc::new(Mutex::new(browser)),
            handler,
            viewport: config.viewport.clone(),
            full_page: config.full_page,
        })
    }
}

#[async_trait]
impl CaptureBackend for ChromiumBackend {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, CaptureError> {
        if self.handler.is_finished() {
            return Err(CaptureError::ContextFailed(
                "browser connection closed".to_string(),
            ));
        }

        let browser = self.browser.lock().await;

        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(|e| CaptureError::ContextFailed(e.to_string()))?
            .result
            .browser_context_id;

        let page = match browser.new_page(page_target(context_id.clone())).await {
            Ok(page) => page,
            Err(e) => {
                dispose_context(&browser, context_id).await;
                return Err(CaptureError::ContextFailed(e.to_string()));
            }
        };
        drop(browser);

        let mut context = ChromiumContext {
            browser: self.browser.clone(),
            browser_context_id: Some(context_id),
            page: Some(page),
            full_page: self.full_page,
            document_request: None,
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(self.viewport.width)
            .height(self.viewport.height)
            .device_scale_factor(self.viewport.device_scale_factor)
            .mobile(false)
            .build()
            .map_err(CaptureError::ContextFailed);

        let applied = match (metrics, context.page()) {
            (Ok(metrics), Ok(page)) => page
                .execute(metrics)
                .await
                .map(|_| ())
                .map_err(|e| CaptureError::ContextFailed(e.to_string())),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        if let Err(e) = applied {
            let _ = context.close().await;
            return Err(e);
        }

        Ok(Box::new(context))
    }

    async fn close(&self) {
        info!("Shutting down browser...");
        if let Err(e) = self.browser.lock().await.close().await {
            warn!("Browser did not close cleanly: {}", e);
        }
        self.handler.abort();
        info!("Browser shutdown complete");
    }
}

/// Target parameters for a blank page inside `context_id`.
fn page_target(context_id: BrowserContextId) -> CreateTargetParams {
    let mut params = CreateTargetParams::new("about:blank");
    params.browser_context_id = Some(context_id);
    params
}

/// Cookie clear limited to one browser context.
fn clear_cookies_in(context_id: BrowserContextId) -> ClearCookiesParams {
    ClearCookiesParams {
        browser_context_id: Some(context_id),
    }
}

async fn dispose_context(browser: &Browser, context_id: BrowserContextId) {
    if let Err(e) = browser
        .execute(DisposeBrowserContextParams::new(context_id))
        .await
    {
        warn!("Failed to dispose browser context: {}", e);
    }
}

/// One page inside its own browser context.
///
/// Cookies, cache and storage are private to the context, so concurrent
/// captures never observe each other.
pub struct ChromiumContext {
    browser: Arc<Mutex<Browser>>,
    browser_context_id: Option<BrowserContextId>,
    page: Option<Page>,
    full_page: bool,
    document_request: Option<RequestId>,
}

impl ChromiumContext {
    fn page(&self) -> Result<&Page, CaptureError> {
        self.page
            .as_ref()
            .ok_or_else(|| CaptureError::ContextFailed("context already closed".to_string()))
    }

    fn context_id(&self) -> Result<BrowserContextId, CaptureError> {
        self.browser_context_id
            .clone()
            .ok_or_else(|| CaptureError::ContextFailed("context already closed".to_string()))
    }
}

#[async_trait]
impl BrowsingContext for ChromiumContext {
    async fn clear_cookies(&mut self) -> Result<(), CaptureError> {
        let params = clear_cookies_in(self.context_id()?);

        self.browser
            .lock()
            .await
            .execute(params)
            .await
            .map_err(|e| CaptureError::ContextFailed(e.to_string()))?;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &Url,
        limit: Duration,
    ) -> Result<NavigationResponse, CaptureError> {
        let page = self.page()?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?;

        let mut requests = page
            .event_listener::<EventRequestWillBeSent>()
            .await
            .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?;
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| CaptureError::NavigationFailed(e.to_string()))?;

        match timeout(limit, page.goto(url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(CaptureError::NavigationFailed(e.to_string())),
            Err(_) => return Err(CaptureError::NavigationTimeout(limit)),
        }

        let final_url = page
            .url()
            .await
            .map_err(|e| CaptureError::MetadataUnavailable(e.to_string()))?
            .unwrap_or_else(|| url.to_string());
        let main_frame = page
            .mainframe()
            .await
            .map_err(|e| CaptureError::MetadataUnavailable(e.to_string()))?
            .map(|frame| frame.inner().clone());

        // Everything up to `load` has been dispatched by now
        let mut observed = Vec::new();
        while let Some(Some(event)) = responses.next().now_or_never() {
            observed.push(ObservedResponse::from_event(&event)?);
        }
        let mut sent = Vec::new();
        while let Some(Some(event)) = requests.next().now_or_never() {
            sent.push(ObservedRequest::from_event(&event)?);
        }

        let document = select_primary_response(&observed, main_frame.as_deref(), &final_url)
            .ok_or_else(|| {
                CaptureError::MetadataUnavailable(format!("no document response for {url}"))
            })?;
        let request = select_request(&sent, &document.request_id).ok_or_else(|| {
            CaptureError::MetadataUnavailable(format!("no request recorded for {url}"))
        })?;

        self.document_request = Some(RequestId::new(document.request_id.clone()));

        Ok(NavigationResponse {
            request: request.meta.clone(),
            ..document.response.clone()
        })
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(self.full_page)
            .build();

        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| CaptureError::ScreenshotFailed(e.to_string()))
    }

    async fn response_body(
        &mut self,
        response: &NavigationResponse,
    ) -> Result<Vec<u8>, CaptureError> {
        let request_id = self.document_request.clone().ok_or_else(|| {
            CaptureError::MetadataUnavailable(format!("no body recorded for {}", response.url))
        })?;

        let body = self
            .page()?
            .execute(GetResponseBodyParams::new(request_id))
            .await
            .map_err(|e| CaptureError::MetadataUnavailable(e.to_string()))?;

        decode_body(&body.result.body, body.result.base64_encoded)
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        let closed = match self.page.take() {
            Some(page) => page
                .close()
                .await
                .map_err(|e| CaptureError::ContextFailed(e.to_string())),
            None => Ok(()),
        };

        if let Some(context_id) = self.browser_context_id.take() {
            dispose_context(&*self.browser.lock().await, context_id).await;
        }

        closed
    }
}

/// A `Network.responseReceived` event reduced to what the capture record needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedResponse {
    pub request_id: String,
    pub frame_id: Option<String>,
    pub is_document: bool,
    pub response: NavigationResponse,
}

impl ObservedResponse {
    fn from_event(event: &EventResponseReceived) -> Result<Self, CaptureError> {
        let response = &event.response;

        Ok(Self {
            request_id: event.request_id.inner().clone(),
            frame_id: event.frame_id.as_ref().map(|id| id.inner().clone()),
            is_document: event.r#type == ResourceType::Document,
            response: NavigationResponse {
                request: RequestMeta::default(),
                ip: response.remote_ip_address.clone(),
                port: response.remote_port.and_then(|p| u16::try_from(p).ok()),
                url: response.url.clone(),
                headers: headers_to_map(&serde_json::to_value(&response.headers)?),
                status: u16::try_from(response.status).unwrap_or_default(),
                status_text: response.status_text.clone(),
            },
        })
    }
}

/// A `Network.requestWillBeSent` event. Redirect hops share one request id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedRequest {
    pub request_id: String,
    pub meta: RequestMeta,
}

impl ObservedRequest {
    fn from_event(event: &EventRequestWillBeSent) -> Result<Self, CaptureError> {
        let request_json = serde_json::to_value(&event.request)?;

        Ok(Self {
            request_id: event.request_id.inner().clone(),
            meta: RequestMeta {
                headers: headers_to_map(&request_json["headers"]),
                method: event.request.method.clone(),
                post_data: request_json["postData"].as_str().map(str::to_string),
                url: event.request.url.clone(),
            },
        })
    }
}

/// Picks the main document response of a navigation.
///
/// Only documents loaded into the main frame qualify, so iframes never win.
/// Among those, the last one whose URL equals the final page URL (fragment
/// ignored) is preferred, then the last main-frame document. When the main
/// frame is unknown every document qualifies.
pub fn select_primary_response<'a>(
    responses: &'a [ObservedResponse],
    main_frame: Option<&str>,
    final_url: &str,
) -> Option<&'a ObservedResponse> {
    let target = without_fragment(final_url);

    let documents: Vec<&ObservedResponse> = responses
        .iter()
        .filter(|observed| observed.is_document)
        .filter(|observed| match main_frame {
            Some(frame) => observed.frame_id.as_deref() == Some(frame),
            None => true,
        })
        .collect();

    documents
        .iter()
        .rev()
        .find(|observed| without_fragment(&observed.response.url) == target)
        .or_else(|| documents.last())
        .copied()
}

/// The last request sent under `request_id`, i.e. the final redirect hop.
pub fn select_request<'a>(
    requests: &'a [ObservedRequest],
    request_id: &str,
) -> Option<&'a ObservedRequest> {
    requests
        .iter()
        .rev()
        .find(|observed| observed.request_id == request_id)
}

fn without_fragment(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('#').next().unwrap_or(url).to_string(),
    }
}

/// Decodes a `Network.getResponseBody` payload.
pub fn decode_body(body: &str, base64_encoded: bool) -> Result<Vec<u8>, CaptureError> {
    if base64_encoded {
        base64::engine::general_purpose::STANDARD
            .decode(body)
            .map_err(|e| CaptureError::MetadataUnavailable(e.to_string()))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

/// Flattens a CDP header object into a sorted map of strings.
pub fn headers_to_map(value: &serde_json::Value) -> BTreeMap<String, String> {
    value
        .as_object()
        .map(|object| {
            object
                .iter()
                .map(|(name, value)| {
                    let value = match value {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (name.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headers_to_map() {
        let headers = headers_to_map(&json!({
            "content-type": "text/html",
            "x-count": 3,
        }));

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["content-type"], "text/html");
        assert_eq!(headers["x-count"], "3");
    }

    #[test]
    fn test_headers_to_map_ignores_non_objects() {
        assert!(headers_to_map(&json!(null)).is_empty());
        assert!(headers_to_map(&json!(["a", "b"])).is_empty());
    }

    fn document(request_id: &str, frame: &str, url: &str, status: u16) -> ObservedResponse {
        ObservedResponse {
            request_id: request_id.to_string(),
            frame_id: Some(frame.to_string()),
            is_document: true,
            response: NavigationResponse {
                url: url.to_string(),
                status,
                ..Default::default()
            },
        }
    }

    fn sent(request_id: &str, url: &str) -> ObservedRequest {
        ObservedRequest {
            request_id: request_id.to_string(),
            meta: RequestMeta {
                method: "GET".to_string(),
                url: url.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_fragment_url_ignores_later_iframe() {
        let responses = vec![
            document("1", "MAIN", "https://site.example/", 200),
            ObservedResponse {
                is_document: false,
                ..document("2", "MAIN", "https://site.example/app.js", 200)
            },
            document("3", "AD", "https://ads.example/frame", 200),
        ];

        let primary =
            select_primary_response(&responses, Some("MAIN"), "https://site.example/#top").unwrap();

        assert_eq!(primary.request_id, "1");
        assert_eq!(primary.response.url, "https://site.example/");
    }

    #[test]
    fn test_main_frame_document_wins_without_url_match() {
        let responses = vec![
            document("1", "MAIN", "https://site.example/landing", 200),
            document("2", "AD", "https://ads.example/frame", 200),
        ];

        let primary =
            select_primary_response(&responses, Some("MAIN"), "https://site.example/other").unwrap();
        assert_eq!(primary.request_id, "1");
    }

    #[test]
    fn test_only_iframe_documents_yield_nothing() {
        let responses = vec![document("7", "AD", "https://ads.example/frame", 200)];
        assert!(select_primary_response(&responses, Some("MAIN"), "https://site.example/").is_none());
    }

    #[test]
    fn test_unknown_main_frame_matches_by_url() {
        let responses = vec![
            document("1", "MAIN", "https://site.example/", 200),
            document("2", "AD", "https://ads.example/frame", 200),
        ];

        let primary = select_primary_response(&responses, None, "https://site.example/").unwrap();
        assert_eq!(primary.request_id, "1");
    }

    #[test]
    fn test_redirect_chain_resolves_to_final_hop() {
        let requests = vec![
            sent("1", "http://site.example/"),
            sent("9", "https://cdn.example/style.css"),
            sent("1", "https://site.example/"),
            sent("1", "https://www.site.example/"),
        ];
        let responses = vec![document("1", "MAIN", "https://www.site.example/", 200)];

        let primary =
            select_primary_response(&responses, Some("MAIN"), "https://www.site.example/").unwrap();
        let request = select_request(&requests, &primary.request_id).unwrap();

        assert_eq!(request.meta.url, "https://www.site.example/");
        assert!(select_request(&requests, "missing").is_none());
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body("<html></html>", false).unwrap(), b"<html></html>");
        assert_eq!(decode_body("aGVsbG8=", true).unwrap(), b"hello");

        let err = decode_body("not base64!", true).unwrap_err();
        assert!(matches!(err, CaptureError::MetadataUnavailable(_)));
    }

    #[test]
    fn test_page_target_is_scoped_to_its_context() {
        let id = BrowserContextId::new("CTX-1");

        let target = page_target(id.clone());
        assert_eq!(target.url, "about:blank");
        assert_eq!(target.browser_context_id, Some(id.clone()));

        assert_eq!(clear_cookies_in(id.clone()).browser_context_id, Some(id));
    }
}
