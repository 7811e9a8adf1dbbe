//! Price candidate extraction.
//!
//! Three strategies of decreasing reliability read a page:
//! - `json_tree`: embedded Next.js data, which carries explicit sale status
//! - `dom`: rendered price elements, located by an ordered selector list
//! - `raw_text`: currency-marked numbers anywhere in the page
//!
//! [`ExtractionPipeline`] runs them in that order and stops at the first one
//! that produces anything.

mod dom;
mod json_tree;
mod price_text;
mod raw_text;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aggregate::PriceBounds;
use crate::session::PageSession;

pub use dom::{DomSelectorStrategy, SelectorDescriptor};
pub use json_tree::JsonTreeStrategy;
pub use price_text::{MarkerMode, PriceTextParser};
pub use raw_text::RawTextStrategy;

/// Which strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Json,
    Dom,
    Regex,
}

impl std::fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateSource::Json => write!(f, "json"),
            CandidateSource::Dom => write!(f, "dom"),
            CandidateSource::Regex => write!(f, "regex"),
        }
    }
}

/// An unvalidated price in whole yen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCandidate {
    pub amount: i64,
    pub source: CandidateSource,
}

impl RawCandidate {
    pub fn new(amount: i64, source: CandidateSource) -> Self {
        Self { amount, source }
    }
}

/// One way of pulling price candidates out of a page.
///
/// Implementations never fail: session errors and malformed data are logged
/// and reported as an empty result so the pipeline can fall through.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn extract(&self, session: &dyn PageSession) -> Vec<RawCandidate>;
}

/// Settings shared by the standard strategies.
#[derive(Debug, Clone)]
pub struct ExtractionSettings {
    pub script_node_id: String,
    pub on_sale_statuses: Vec<String>,
    pub price_selectors: Vec<SelectorDescriptor>,
    pub exchange_rate_usd_to_jpy: Option<f64>,
}

/// Ordered strategies with first-non-empty-wins semantics.
pub struct ExtractionPipeline {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionPipeline {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// JSON, then DOM, then raw text.
    pub fn standard(settings: &ExtractionSettings, bounds: PriceBounds) -> Self {
        let parser = PriceTextParser::new(settings.exchange_rate_usd_to_jpy);
        Self::new(vec![
            Box::new(JsonTreeStrategy::new(
                settings.script_node_id.clone(),
                settings.on_sale_statuses.clone(),
            )),
            Box::new(DomSelectorStrategy::new(
                settings.price_selectors.clone(),
                parser.clone(),
                bounds,
            )),
            Box::new(RawTextStrategy::new(parser)),
        ])
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run strategies in order and return the first non-empty result.
    pub async fn run(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        for strategy in &self.strategies {
            let candidates = strategy.extract(session).await;
            if !candidates.is_empty() {
                debug!(
                    "{} strategy produced {} candidates",
                    strategy.name(),
                    candidates.len()
                );
                return candidates;
            }
            debug!("{} strategy produced nothing", strategy.name());
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::session::testing::FakePage;

    struct FixedStrategy {
        name: &'static str,
        amounts: Vec<i64>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ExtractionStrategy for FixedStrategy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, _session: &dyn PageSession) -> Vec<RawCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.amounts
                .iter()
                .map(|a| RawCandidate::new(*a, CandidateSource::Dom))
                .collect()
        }
    }

    fn fixed(name: &'static str, amounts: &[i64]) -> (Box<dyn ExtractionStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let strategy = FixedStrategy {
            name,
            amounts: amounts.to_vec(),
            calls: calls.clone(),
        };
        (Box::new(strategy), calls)
    }

    fn settings() -> ExtractionSettings {
        ExtractionSettings {
            script_node_id: "__NEXT_DATA__".to_string(),
            on_sale_statuses: vec!["on_sale".to_string()],
            price_selectors: vec![SelectorDescriptor::new(
                "item-price",
                r#"[data-testid="item-price"]"#,
            )],
            exchange_rate_usd_to_jpy: None,
        }
    }

    #[tokio::test]
    async fn test_first_non_empty_wins() {
        let (a, a_calls) = fixed("a", &[]);
        let (b, b_calls) = fixed("b", &[5]);
        let (c, c_calls) = fixed("c", &[7]);
        let pipeline = ExtractionPipeline::new(vec![a, b, c]);

        let result = pipeline.run(&FakePage::default()).await;
        assert_eq!(result.iter().map(|c| c.amount).collect::<Vec<_>>(), vec![5]);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_empty_yields_empty() {
        let (a, _) = fixed("a", &[]);
        let (b, _) = fixed("b", &[]);
        let pipeline = ExtractionPipeline::new(vec![a, b]);
        assert!(pipeline.run(&FakePage::default()).await.is_empty());
    }

    #[tokio::test]
    async fn test_standard_pipeline_short_circuits_on_json() {
        let page = FakePage::default()
            .with_script("__NEXT_DATA__", r#"{"items":[{"price":12000}]}"#)
            .with_elements(r#"[data-testid="item-price"]"#, &["¥9,999"])
            .with_full_text("¥8,888");
        let pipeline = ExtractionPipeline::standard(&settings(), PriceBounds::default());
        assert_eq!(pipeline.strategy_names(), vec!["json", "dom", "regex"]);

        let result = pipeline.run(&page).await;
        assert_eq!(result, vec![RawCandidate::new(12000, CandidateSource::Json)]);
        assert_eq!(page.script_calls.load(Ordering::SeqCst), 1);
        assert_eq!(page.element_calls.load(Ordering::SeqCst), 0);
        assert_eq!(page.full_text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_standard_pipeline_falls_through_to_regex() {
        let page = FakePage::default()
            .with_script("__NEXT_DATA__", "{not json")
            .with_full_text("<div>¥3,500</div><div>¥4,200</div>");
        let pipeline = ExtractionPipeline::standard(&settings(), PriceBounds::default());

        let result = pipeline.run(&page).await;
        assert_eq!(
            result,
            vec![
                RawCandidate::new(3500, CandidateSource::Regex),
                RawCandidate::new(4200, CandidateSource::Regex),
            ]
        );
        assert_eq!(page.element_calls.load(Ordering::SeqCst), 1);
    }
}
