//! Simulated browser backend for unit tests.
//!
//! Pages are scripted per URL; every call is recorded so tests can assert on
//! how many contexts were opened and closed and how many screenshots a URL got.

use crate::blank::tests::busy_png;
use crate::{
    BrowsingContext, CaptureBackend, CaptureError, NavigationResponse, RequestMeta,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Scripted behaviour for one URL.
#[derive(Clone)]
pub struct SimulatedPage {
    pub status: u16,
    pub navigation_error: Option<CaptureError>,
    /// Returned one per screenshot call; the last frame repeats
    pub frames: Vec<Vec<u8>>,
    pub body: Vec<u8>,
    pub redirect_to: Option<String>,
}

impl SimulatedPage {
    pub fn ok() -> Self {
        Self {
            status: 200,
            navigation_error: None,
            frames: vec![busy_png()],
            body: b"<html><body>hello</body></html>".to_vec(),
            redirect_to: None,
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn frames(mut self, frames: Vec<Vec<u8>>) -> Self {
        self.frames = frames;
        self
    }

    pub fn redirect_to(mut self, url: &str) -> Self {
        self.redirect_to = Some(url.to_string());
        self
    }

    pub fn timing_out() -> Self {
        Self {
            navigation_error: Some(CaptureError::NavigationTimeout(Duration::from_millis(3800))),
            ..Self::ok()
        }
    }
}

#[derive(Default)]
pub struct Calls {
    pub contexts_opened: usize,
    pub contexts_closed: usize,
    pub cookies_cleared: usize,
    pub navigations: HashMap<String, usize>,
    pub screenshots: HashMap<String, usize>,
    pub backend_closed: bool,
}

#[derive(Clone, Default)]
pub struct SimulatedBackend {
    pages: Arc<Mutex<HashMap<String, SimulatedPage>>>,
    calls: Arc<Mutex<Calls>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `page` for `url`. Unscripted URLs behave like [`SimulatedPage::ok`].
    pub fn with_page(self, url: &str, page: SimulatedPage) -> Self {
        let key = Url::parse(url).map(|u| u.to_string()).unwrap_or_else(|_| url.to_string());
        self.pages.lock().unwrap().insert(key, page);
        self
    }

    pub fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap()
    }

    pub fn screenshots_for(&self, url: &str) -> usize {
        let key = Url::parse(url).unwrap().to_string();
        self.calls().screenshots.get(&key).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CaptureBackend for SimulatedBackend {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>, CaptureError> {
        self.calls().contexts_opened += 1;
        Ok(Box::new(SimulatedContext {
            backend: self.clone(),
            current: None,
            frame: 0,
            closed: false,
        }))
    }

    async fn close(&self) {
        self.calls().backend_closed = true;
    }
}

pub struct SimulatedContext {
    backend: SimulatedBackend,
    current: Option<(String, SimulatedPage)>,
    frame: usize,
    closed: bool,
}

#[async_trait]
impl BrowsingContext for SimulatedContext {
    async fn clear_cookies(&mut self) -> Result<(), CaptureError> {
        self.backend.calls().cookies_cleared += 1;
        Ok(())
    }

    async fn navigate(
        &mut self,
        url: &Url,
        limit: Duration,
    ) -> Result<NavigationResponse, CaptureError> {
        let key = url.to_string();
        *self
            .backend
            .calls()
            .navigations
            .entry(key.clone())
            .or_default() += 1;

        let page = self
            .backend
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(SimulatedPage::ok);

        if let Some(error) = page.navigation_error.clone() {
            // A real timeout only fires once the limit has elapsed
            if matches!(error, CaptureError::NavigationTimeout(_)) {
                tokio::time::sleep(limit).await;
                return Err(CaptureError::NavigationTimeout(limit));
            }
            return Err(error);
        }

        let resolved = page.redirect_to.clone().unwrap_or_else(|| key.clone());
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());

        let response = NavigationResponse {
            request: RequestMeta {
                headers: BTreeMap::from([("accept".to_string(), "*/*".to_string())]),
                method: "GET".to_string(),
                post_data: None,
                url: resolved.clone(),
            },
            ip: Some("127.0.0.1".to_string()),
            port: Some(url.port_or_known_default().unwrap_or(80)),
            url: resolved,
            headers,
            status: page.status,
            status_text: if page.status == 200 { "OK" } else { "Not Found" }.to_string(),
        };

        self.current = Some((key, page));
        Ok(response)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        let (key, page) = self
            .current
            .as_ref()
            .ok_or_else(|| CaptureError::ScreenshotFailed("nothing loaded".to_string()))?;

        *self
            .backend
            .calls()
            .screenshots
            .entry(key.clone())
            .or_default() += 1;

        let index = self.frame.min(page.frames.len().saturating_sub(1));
        self.frame += 1;
        page.frames
            .get(index)
            .cloned()
            .ok_or_else(|| CaptureError::ScreenshotFailed("no frames scripted".to_string()))
    }

    async fn response_body(
        &mut self,
        _response: &NavigationResponse,
    ) -> Result<Vec<u8>, CaptureError> {
        self.current
            .as_ref()
            .map(|(_, page)| page.body.clone())
            .ok_or_else(|| CaptureError::MetadataUnavailable("nothing loaded".to_string()))
    }

    async fn close(&mut self) -> Result<(), CaptureError> {
        if !self.closed {
            self.closed = true;
            self.backend.calls().contexts_closed += 1;
        }
        Ok(())
    }
}
