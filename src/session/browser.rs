//! Headless Chrome page session.
//!
//! Marketplace search results are rendered client-side, so the browser session
//! waits for item cells to appear and scrolls to trigger lazy loading before
//! any strategy reads the page. Search API responses seen while the page
//! loads are captured so the JSON strategy can read them too.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, RequestId,
    SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::http::DEFAULT_USER_AGENT;
use super::{is_search_api_url, keep_if_loaded, PageSession, Tab};
use crate::error::FetchError;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browser session configuration.
#[derive(Debug, Clone)]
pub struct BrowserSessionConfig {
    pub headless: bool,
    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    pub remote_url: Option<String>,
    pub chrome_args: Vec<String>,
    pub user_agent: String,
    /// Item-cell selectors; navigation waits for the first one that appears.
    pub item_selectors: Vec<String>,
    pub selector_timeout: Duration,
    /// Scroll steps after load to trigger lazy-loaded results.
    pub scroll_steps: u32,
    pub scroll_pause: Duration,
    /// Substrings a response URL must all contain to be captured.
    pub api_url_markers: Vec<String>,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            remote_url: None,
            chrome_args: Vec::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            item_selectors: Vec::new(),
            selector_timeout: Duration::from_secs(20),
            scroll_steps: 0,
            scroll_pause: Duration::ZERO,
            api_url_markers: vec!["api".to_string(), "search".to_string()],
        }
    }
}

/// Page session backed by chromiumoxide.
pub struct BrowserSession {
    config: BrowserSessionConfig,
    browser: Option<Browser>,
    page: Option<Page>,
    api_payloads: Vec<String>,
}

#[async_trait]
impl Tab for Page {
    async fn discard(self) {
        let _ = self.close().await;
    }
}

/// Records request ids of search API responses while a page loads.
struct ApiCapture {
    task: Option<JoinHandle<()>>,
    matched: Arc<Mutex<Vec<RequestId>>>,
}

impl ApiCapture {
    async fn start(page: &Page, markers: &[String]) -> Self {
        let matched = Arc::new(Mutex::new(Vec::new()));
        if let Err(e) = page.execute(EnableParams::default()).await {
            warn!("Failed to enable network events: {}", e);
        }

        let task = match page.event_listener::<EventResponseReceived>().await {
            Ok(mut responses) => {
                let markers = markers.to_vec();
                let sink = matched.clone();
                Some(tokio::spawn(async move {
                    while let Some(event) = responses.next().await {
                        if is_search_api_url(&event.response.url, &markers) {
                            debug!("Captured API response: {}", event.response.url);
                            sink.lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push(event.request_id.clone());
                        }
                    }
                }))
            }
            Err(e) => {
                warn!("Failed to subscribe to network responses: {}", e);
                None
            }
        };

        Self { task, matched }
    }

    /// Stop listening and return what was captured.
    fn finish(self) -> Vec<RequestId> {
        if let Some(task) = self.task {
            task.abort();
        }
        std::mem::take(&mut *self.matched.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Fetch captured response bodies. Unreadable bodies are skipped.
async fn read_response_bodies(page: &Page, request_ids: Vec<RequestId>) -> Vec<String> {
    let mut bodies = Vec::new();
    for request_id in request_ids {
        let response = match page.execute(GetResponseBodyParams::new(request_id)).await {
            Ok(response) => response,
            Err(e) => {
                debug!("Could not read API response body: {}", e);
                continue;
            }
        };
        let body = &response.result;
        if !body.base64_encoded {
            bodies.push(body.body.clone());
            continue;
        }
        match base64::engine::general_purpose::STANDARD
            .decode(&body.body)
            .map(String::from_utf8)
        {
            Ok(Ok(text)) => bodies.push(text),
            _ => debug!("Skipping undecodable API response body"),
        }
    }
    bodies
}

fn session_err(context: &str, e: impl std::fmt::Display) -> FetchError {
    FetchError::Session(format!("{}: {}", context, e))
}

impl BrowserSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: BrowserSessionConfig) -> Self {
        Self {
            config,
            browser: None,
            page: None,
            api_payloads: Vec::new(),
        }
    }

    fn find_chrome() -> Result<PathBuf, FetchError> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(FetchError::Session(
            "Chrome/Chromium not found; install it or configure browser.remote_url".to_string(),
        ))
    }

    /// Launch or connect to the browser if not already running.
    async fn ensure_browser(&mut self) -> Result<(), FetchError> {
        if self.browser.is_some() {
            return Ok(());
        }

        let (browser, mut handler) = if let Some(remote_url) = self.config.remote_url.clone() {
            info!("Connecting to remote browser at {}", remote_url);
            Browser::connect(remote_url)
                .await
                .map_err(|e| session_err("Failed to connect to remote browser", e))?
        } else {
            info!("Launching browser (headless={})", self.config.headless);
            let mut builder = BrowserConfig::builder().chrome_executable(Self::find_chrome()?);
            if !self.config.headless {
                builder = builder.with_head();
            }
            builder = builder
                .arg("--lang=ja-JP")
                .arg("--window-size=1280,800")
                .arg("--disable-dev-shm-usage")
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--no-sandbox")
                .arg("--disable-gpu");
            for arg in &self.config.chrome_args {
                builder = builder.arg(arg);
            }
            let config = builder
                .build()
                .map_err(|e| session_err("Failed to build browser config", e))?;
            Browser::launch(config)
                .await
                .map_err(|e| session_err("Failed to launch browser", e))?
        };

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(browser);
        Ok(())
    }

    fn page(&self) -> Result<&Page, FetchError> {
        self.page
            .as_ref()
            .ok_or_else(|| FetchError::Session("No page loaded".to_string()))
    }

    async fn wait_for_page_ready(page: &Page, timeout: Duration) {
        match tokio::time::timeout(timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await
        {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }

    /// Wait for the first item selector that shows up. Absence is not an
    /// error: the raw-text strategy can still work on an unfamiliar layout.
    async fn wait_for_items(&self, page: &Page) {
        for selector in &self.config.item_selectors {
            debug!("Waiting for selector: {}", selector);
            let poll = async {
                loop {
                    if page.find_element(selector.as_str()).await.is_ok() {
                        return;
                    }
                    tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
                }
            };
            match tokio::time::timeout(self.config.selector_timeout, poll).await {
                Ok(()) => {
                    info!("Found items with selector: {}", selector);
                    return;
                }
                Err(_) => debug!("Selector not found: {}", selector),
            }
        }
    }

    async fn scroll(&self, page: &Page) {
        for step in 1..=self.config.scroll_steps {
            debug!("Scroll step {}", step);
            if let Err(e) = page.evaluate("window.scrollBy(0, 1000)").await {
                debug!("Scroll failed: {}", e);
                return;
            }
            tokio::time::sleep(self.config.scroll_pause).await;
        }
    }

    /// Bring a fresh tab to `url` and capture search API responses on the way.
    async fn load(&mut self, page: &Page, url: &str, timeout: Duration) -> Result<(), FetchError> {
        page.execute(SetUserAgentOverrideParams::new(self.config.user_agent.clone()))
            .await
            .map_err(|e| session_err("Failed to set user agent", e))?;

        let capture = ApiCapture::start(page, &self.config.api_url_markers).await;
        let opened = self.open(page, url, timeout).await;
        let request_ids = capture.finish();
        opened?;

        self.api_payloads = read_response_bodies(page, request_ids).await;
        if !self.api_payloads.is_empty() {
            info!("Captured {} API responses", self.api_payloads.len());
        }
        Ok(())
    }

    async fn open(&self, page: &Page, url: &str, timeout: Duration) -> Result<(), FetchError> {
        info!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| FetchError::Navigation(format!("Invalid URL: {}", e)))?;

        match tokio::time::timeout(timeout, page.execute(nav_params)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(FetchError::Navigation(e.to_string())),
            Err(_) => {
                return Err(FetchError::NavigationTimeout {
                    url: url.to_string(),
                    timeout,
                })
            }
        }

        Self::wait_for_page_ready(page, timeout).await;
        self.wait_for_items(page).await;
        self.scroll(page).await;
        Ok(())
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        self.ensure_browser().await?;
        self.api_payloads.clear();

        // Close the previous tab to prevent accumulation across retries
        if let Some(old) = self.page.take() {
            let _ = old.close().await;
        }

        let page = match self.browser.as_ref() {
            Some(browser) => browser
                .new_page("about:blank")
                .await
                .map_err(|e| session_err("Failed to open page", e))?,
            None => return Err(FetchError::Session("Browser not running".to_string())),
        };

        let loaded = self.load(&page, url, timeout).await;
        self.page = Some(keep_if_loaded(page, loaded).await?);
        Ok(())
    }

    async fn get_element_texts(&self, selector: &str) -> Result<Vec<String>, FetchError> {
        let selector_json = serde_json::to_string(selector)
            .map_err(|e| session_err("Failed to encode selector", e))?;
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(e => e.textContent || '')",
            selector_json
        );
        self.page()?
            .evaluate(script)
            .await
            .map_err(|e| session_err("Selector query failed", e))?
            .into_value::<Vec<String>>()
            .map_err(|e| session_err("Unexpected selector result", e))
    }

    async fn get_script_text(&self, node_id: &str) -> Result<String, FetchError> {
        let id_json = serde_json::to_string(node_id)
            .map_err(|e| session_err("Failed to encode node id", e))?;
        let script = format!(
            "(() => {{ const el = document.getElementById({}); return el ? (el.textContent || '') : ''; }})()",
            id_json
        );
        self.page()?
            .evaluate(script)
            .await
            .map_err(|e| session_err("Script node query failed", e))?
            .into_value::<String>()
            .map_err(|e| session_err("Unexpected script node result", e))
    }

    async fn get_full_page_text(&self) -> Result<String, FetchError> {
        self.page()?
            .content()
            .await
            .map_err(|e| session_err("Failed to read page content", e))
    }

    async fn get_api_payloads(&self) -> Result<Vec<String>, FetchError> {
        Ok(self.api_payloads.clone())
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
        }
    }
}
