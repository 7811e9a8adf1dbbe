//! Plain HTTP page session.
//!
//! Fetches the search page without a browser and answers selector queries
//! against the static HTML. Works for server-rendered pages and for the
//! embedded `__NEXT_DATA__` payload, which is present before hydration.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info};

use super::{script_selector, PageSession};
use crate::error::FetchError;

/// Default user agent for HTTP requests.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Page session backed by reqwest + scraper.
pub struct HttpSession {
    client: reqwest::Client,
    html: Option<String>,
}

impl HttpSession {
    /// Create a session with the given user agent.
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| FetchError::Session(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            html: None,
        })
    }

    /// Create a session over already-fetched HTML (saved pages, tests).
    pub fn from_html(html: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            html: Some(html.into()),
        }
    }

    fn html(&self) -> Result<&str, FetchError> {
        self.html
            .as_deref()
            .ok_or_else(|| FetchError::Session("No page loaded".to_string()))
    }

    fn select_texts(html: &str, selector: &str) -> Result<Vec<String>, FetchError> {
        let selector = Selector::parse(selector)
            .map_err(|e| FetchError::Session(format!("Invalid selector '{}': {}", selector, e)))?;
        let document = Html::parse_document(html);
        Ok(document
            .select(&selector)
            .map(|el| el.text().collect::<String>())
            .collect())
    }
}

#[async_trait]
impl PageSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), FetchError> {
        info!("Fetching {}", url);
        self.html = None;

        let response = self
            .client
            .get(url)
            .header("Accept-Language", "ja-JP,ja;q=0.9")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::NavigationTimeout {
                        url: url.to_string(),
                        timeout,
                    }
                } else {
                    FetchError::Navigation(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Navigation(format!("HTTP {} from {}", status, url)));
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Navigation(format!("Failed to read body: {}", e)))?;
        debug!("Fetched {} bytes from {}", body.len(), final_url);

        self.html = Some(body);
        Ok(())
    }

    async fn get_element_texts(&self, selector: &str) -> Result<Vec<String>, FetchError> {
        Self::select_texts(self.html()?, selector)
    }

    async fn get_script_text(&self, node_id: &str) -> Result<String, FetchError> {
        let texts = Self::select_texts(self.html()?, &script_selector(node_id))?;
        Ok(texts.into_iter().next().unwrap_or_default())
    }

    async fn get_full_page_text(&self) -> Result<String, FetchError> {
        Ok(self.html()?.to_string())
    }
}
