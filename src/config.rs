//! Configuration for pricewatch.
//!
//! Loaded from TOML, YAML or JSON (chosen by file extension). When no path is
//! given, the prefer crate discovers a `pricewatch` config file in the
//! standard locations; without one, defaults apply.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregationPolicy, MedianRounding, PriceBounds, DEFAULT_TRIM_PERCENT};
use crate::error::ConfigError;
use crate::extract::{ExtractionSettings, SelectorDescriptor};
use crate::retry::RetryPolicy;
use crate::session::DEFAULT_USER_AGENT;

/// Placeholder replaced with the URL-encoded keyword.
pub const KEYWORD_PLACEHOLDER: &str = "{keyword}";

pub const DEFAULT_SEARCH_URL: &str =
    "https://jp.mercari.com/search?keyword={keyword}&sort=score&order=desc&item_status=on_sale";

/// A tracked product as written in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    pub display_name: String,
    pub keyword: String,
    /// Overrides the global bounds for this product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_bounds: Option<PriceBounds>,
}

/// A tracked product with its effective bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub display_name: String,
    pub keyword: String,
    pub price_bounds: PriceBounds,
}

impl SearchQuery {
    pub fn new(display_name: impl Into<String>, keyword: impl Into<String>, price_bounds: PriceBounds) -> Self {
        Self {
            display_name: display_name.into(),
            keyword: keyword.into(),
            price_bounds,
        }
    }

    /// Key under which this query's progress is stored.
    pub fn id(&self) -> &str {
        &self.keyword
    }
}

/// Browser launch options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    pub remote_url: Option<String>,
    pub chrome_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            remote_url: None,
            chrome_args: Vec::new(),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base directory for relative state/output paths.
    pub data_dir: PathBuf,
    pub state_file: PathBuf,
    pub output_file: PathBuf,
    /// Add Min/Max/Count columns to the CSV.
    pub extended_output: bool,
    pub search_url_template: String,

    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,

    pub price_bounds: PriceBounds,
    pub trim_percent: u32,
    pub median_rounding: MedianRounding,
    /// Inclusive range for the randomized pause between queries.
    pub request_delay_range_ms: (u64, u64),
    /// Enables dollar-marked prices. Unset means dollar amounts are ignored.
    pub exchange_rate_usd_to_jpy: Option<f64>,

    pub navigation_timeout_ms: u64,
    pub selector_timeout_ms: u64,
    pub script_node_id: String,
    pub on_sale_statuses: Vec<String>,
    pub price_selectors: Vec<SelectorDescriptor>,
    pub item_selectors: Vec<String>,
    pub scroll_steps: u32,
    pub scroll_pause_ms: u64,
    /// Substrings a network response URL must all contain to be read as a
    /// search API payload (browser session only).
    pub api_url_markers: Vec<String>,
    pub user_agent: String,
    pub browser: BrowserOptions,

    pub queries: Vec<QueryConfig>,

    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_price_selectors() -> Vec<SelectorDescriptor> {
    [
        ("item-price", r#"[data-testid="item-price"]"#),
        ("merPrice", ".merPrice"),
        ("thumbnail-price", ".merItemThumbnail__price"),
        ("merItem-price", ".merItem__price"),
        ("search-price", r#"[data-location="search"] [data-testid="price"]"#),
    ]
    .into_iter()
    .map(|(name, css)| SelectorDescriptor::new(name, css))
    .collect()
}

fn default_item_selectors() -> Vec<String> {
    [
        r#"[data-testid="item-cell"]"#,
        ".merItemThumbnail",
        "mer-item-thumbnail",
        r#"[data-location="search"] [data-testid="thumbnail"]"#,
        ".merItem",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            state_file: PathBuf::from("state/batch_state.json"),
            output_file: PathBuf::from("latest.csv"),
            extended_output: false,
            search_url_template: DEFAULT_SEARCH_URL.to_string(),
            max_retries: 3,
            backoff_base_ms: 2_000,
            max_backoff_ms: 60_000,
            price_bounds: PriceBounds::default(),
            trim_percent: DEFAULT_TRIM_PERCENT,
            median_rounding: MedianRounding::default(),
            request_delay_range_ms: (3_000, 8_000),
            exchange_rate_usd_to_jpy: None,
            navigation_timeout_ms: 90_000,
            selector_timeout_ms: 20_000,
            script_node_id: "__NEXT_DATA__".to_string(),
            on_sale_statuses: vec![
                "STATUS_ON_SALE".to_string(),
                "on_sale".to_string(),
                "ITEM_STATUS_ON_SALE".to_string(),
            ],
            price_selectors: default_price_selectors(),
            item_selectors: default_item_selectors(),
            scroll_steps: 4,
            scroll_pause_ms: 3_000,
            api_url_markers: vec!["api".to_string(), "search".to_string()],
            user_agent: DEFAULT_USER_AGENT.to_string(),
            browser: BrowserOptions::default(),
            queries: Vec::new(),
            source_path: None,
        }
    }
}

impl Config {
    /// Load from an explicit path, or discover a config file, or fall back
    /// to defaults. Environment overrides are applied last.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::load_from_path(path).await?,
            None => match prefer::load("pricewatch").await {
                Ok(pref_config) => match pref_config.source_path() {
                    Some(path) => Self::load_from_path(path).await?,
                    None => Self::default(),
                },
                // No config file found
                Err(_) => Self::default(),
            },
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");
        let mut config = Self::parse(&contents, ext).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse config text in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "json" => serde_json::from_str(contents).map_err(|e| e.to_string()),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| e.to_string()),
            _ => toml::from_str(contents).map_err(|e| e.to_string()),
        }
    }

    /// Apply `PRICEWATCH_*` overrides from a variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = lookup("PRICEWATCH_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.max_retries = n;
        }
        if let Some(path) = lookup("PRICEWATCH_STATE_FILE") {
            self.state_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("PRICEWATCH_OUTPUT_FILE") {
            self.output_file = PathBuf::from(path);
        }
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_bounds("price_bounds", &self.price_bounds)?;
        if self.trim_percent >= 50 {
            return Err(ConfigError::Invalid(format!(
                "trim_percent must be below 50, got {}",
                self.trim_percent
            )));
        }
        let (lo, hi) = self.request_delay_range_ms;
        if lo > hi {
            return Err(ConfigError::Invalid(format!(
                "request_delay_range_ms is inverted: [{}, {}]",
                lo, hi
            )));
        }
        if !self.search_url_template.contains(KEYWORD_PLACEHOLDER) {
            return Err(ConfigError::Invalid(format!(
                "search_url_template must contain {}",
                KEYWORD_PLACEHOLDER
            )));
        }
        if let Err(e) = url::Url::parse(&self.search_url("sample")) {
            return Err(ConfigError::Invalid(format!(
                "search_url_template is not a valid URL: {}",
                e
            )));
        }
        if let Some(rate) = self.exchange_rate_usd_to_jpy {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "exchange_rate_usd_to_jpy must be positive, got {}",
                    rate
                )));
            }
        }

        let mut seen = HashSet::new();
        for query in &self.queries {
            if query.keyword.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "query '{}' has an empty keyword",
                    query.display_name
                )));
            }
            if !seen.insert(query.keyword.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate query keyword '{}'",
                    query.keyword
                )));
            }
            if let Some(bounds) = &query.price_bounds {
                check_bounds(&format!("price_bounds of '{}'", query.display_name), bounds)?;
            }
        }
        Ok(())
    }

    /// Queries with effective bounds, in configured order.
    pub fn search_queries(&self) -> Vec<SearchQuery> {
        self.queries
            .iter()
            .map(|q| SearchQuery {
                display_name: q.display_name.clone(),
                keyword: q.keyword.clone(),
                price_bounds: q.price_bounds.unwrap_or(self.price_bounds),
            })
            .collect()
    }

    /// Search URL for a keyword.
    pub fn search_url(&self, keyword: &str) -> String {
        build_search_url(&self.search_url_template, keyword)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn aggregation_policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            trim_percent: self.trim_percent,
            rounding: self.median_rounding,
        }
    }

    pub fn extraction_settings(&self) -> ExtractionSettings {
        ExtractionSettings {
            script_node_id: self.script_node_id.clone(),
            on_sale_statuses: self.on_sale_statuses.clone(),
            price_selectors: self.price_selectors.clone(),
            exchange_rate_usd_to_jpy: self.exchange_rate_usd_to_jpy,
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn request_delay_range(&self) -> (Duration, Duration) {
        let (lo, hi) = self.request_delay_range_ms;
        (Duration::from_millis(lo), Duration::from_millis(hi))
    }

    #[cfg(feature = "browser")]
    pub fn browser_session_config(&self) -> crate::session::BrowserSessionConfig {
        crate::session::BrowserSessionConfig {
            headless: self.browser.headless,
            remote_url: self.browser.remote_url.clone(),
            chrome_args: self.browser.chrome_args.clone(),
            user_agent: self.user_agent.clone(),
            item_selectors: self.item_selectors.clone(),
            selector_timeout: Duration::from_millis(self.selector_timeout_ms),
            scroll_steps: self.scroll_steps,
            scroll_pause: Duration::from_millis(self.scroll_pause_ms),
            api_url_markers: self.api_url_markers.clone(),
        }
    }

    /// Get the base directory for resolving relative paths.
    /// Returns the config file's parent directory if available.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path against the data directory (itself relative to the
    /// config file location).
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        let data_dir = if self.data_dir.is_absolute() {
            self.data_dir.clone()
        } else {
            match self.base_dir() {
                Some(base) => base.join(&self.data_dir),
                None => self.data_dir.clone(),
            }
        };
        data_dir.join(path)
    }

    pub fn state_path(&self) -> PathBuf {
        self.resolve_path(&self.state_file)
    }

    pub fn output_path(&self) -> PathBuf {
        self.resolve_path(&self.output_file)
    }
}

/// Substitute the URL-encoded keyword into a search URL template.
pub fn build_search_url(template: &str, keyword: &str) -> String {
    template.replace(KEYWORD_PLACEHOLDER, &urlencoding::encode(keyword))
}

fn check_bounds(label: &str, bounds: &PriceBounds) -> Result<(), ConfigError> {
    if bounds.min > bounds.max {
        return Err(ConfigError::Invalid(format!(
            "{} is inverted: min {} > max {}",
            label, bounds.min, bounds.max
        )));
    }
    Ok(())
}
