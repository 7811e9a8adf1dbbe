//! Page sessions: the boundary between extraction logic and whatever renders
//! the marketplace page.
//!
//! Extraction strategies only ever see a [`PageSession`]. Two implementations
//! are provided: [`HttpSession`] fetches static HTML with reqwest and queries
//! it with `scraper`, and `BrowserSession` (feature `browser`) drives headless
//! Chrome through chromiumoxide for pages that render client-side.

#[cfg(feature = "browser")]
mod browser;
mod http;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchError;

#[cfg(feature = "browser")]
pub use browser::{BrowserSession, BrowserSessionConfig};
pub use http::{HttpSession, DEFAULT_USER_AGENT};

/// A rendered page that extraction strategies can read from.
#[async_trait]
pub trait PageSession: Send + Sync {
    /// Navigate to `url`, failing with [`FetchError::NavigationTimeout`] if the
    /// page does not load within `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), FetchError>;

    /// Text content of every element matching a CSS selector, in document order.
    async fn get_element_texts(&self, selector: &str) -> Result<Vec<String>, FetchError>;

    /// Raw text of the `<script>` element with the given id. Empty if absent.
    async fn get_script_text(&self, node_id: &str) -> Result<String, FetchError>;

    /// Full page markup/text.
    async fn get_full_page_text(&self) -> Result<String, FetchError>;

    /// Bodies of search API responses captured during the last navigation.
    /// Sessions that cannot observe network traffic report none.
    async fn get_api_payloads(&self) -> Result<Vec<String>, FetchError> {
        Ok(Vec::new())
    }

    /// Release whatever the session holds open.
    async fn close(&mut self) {}
}

/// Build the `script#id` selector for an embedded-data node.
pub(crate) fn script_selector(node_id: &str) -> String {
    format!("script#{}", node_id)
}

/// A response URL is a search API call when it contains every marker.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) fn is_search_api_url(url: &str, markers: &[String]) -> bool {
    !markers.is_empty() && markers.iter().all(|m| url.contains(m.as_str()))
}

/// A browser tab that can be thrown away.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
#[async_trait]
pub(crate) trait Tab: Send + Sized {
    async fn discard(self);
}

/// Hand the tab back if it loaded; otherwise close it and return the error.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
pub(crate) async fn keep_if_loaded<T: Tab>(
    tab: T,
    loaded: Result<(), FetchError>,
) -> Result<T, FetchError> {
    match loaded {
        Ok(()) => Ok(tab),
        Err(e) => {
            tab.discard().await;
            Err(e)
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted page session for strategy and orchestrator tests.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// In-memory page with call counters.
    #[derive(Default, Clone)]
    pub struct FakePage {
        pub element_texts: HashMap<String, Vec<String>>,
        pub scripts: HashMap<String, String>,
        pub full_text: String,
        pub api_payloads: Vec<String>,
        pub element_calls: Arc<AtomicUsize>,
        pub script_calls: Arc<AtomicUsize>,
        pub full_text_calls: Arc<AtomicUsize>,
        pub navigations: Arc<Mutex<Vec<String>>>,
    }

    impl FakePage {
        pub fn with_elements(mut self, selector: &str, texts: &[&str]) -> Self {
            self.element_texts.insert(
                selector.to_string(),
                texts.iter().map(|t| t.to_string()).collect(),
            );
            self
        }

        pub fn with_script(mut self, node_id: &str, body: &str) -> Self {
            self.scripts.insert(node_id.to_string(), body.to_string());
            self
        }

        pub fn with_full_text(mut self, text: &str) -> Self {
            self.full_text = text.to_string();
            self
        }

        pub fn with_api_payload(mut self, body: &str) -> Self {
            self.api_payloads.push(body.to_string());
            self
        }
    }

    #[async_trait]
    impl PageSession for FakePage {
        async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), FetchError> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn get_element_texts(&self, selector: &str) -> Result<Vec<String>, FetchError> {
            self.element_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.element_texts.get(selector).cloned().unwrap_or_default())
        }

        async fn get_script_text(&self, node_id: &str) -> Result<String, FetchError> {
            self.script_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scripts.get(node_id).cloned().unwrap_or_default())
        }

        async fn get_full_page_text(&self) -> Result<String, FetchError> {
            self.full_text_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.full_text.clone())
        }

        async fn get_api_payloads(&self) -> Result<Vec<String>, FetchError> {
            Ok(self.api_payloads.clone())
        }
    }
}
