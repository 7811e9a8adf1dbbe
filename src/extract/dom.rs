//! Extraction from rendered price elements.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::price_text::{MarkerMode, PriceTextParser};
use super::{CandidateSource, ExtractionStrategy, RawCandidate};
use crate::aggregate::PriceBounds;
use crate::session::PageSession;

/// A named CSS selector for price elements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorDescriptor {
    pub name: String,
    pub css: String,
}

impl SelectorDescriptor {
    pub fn new(name: impl Into<String>, css: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            css: css.into(),
        }
    }
}

/// Tries price selectors in order; the first one yielding an in-range price
/// wins.
pub struct DomSelectorStrategy {
    selectors: Vec<SelectorDescriptor>,
    parser: PriceTextParser,
    bounds: PriceBounds,
}

impl DomSelectorStrategy {
    pub fn new(selectors: Vec<SelectorDescriptor>, parser: PriceTextParser, bounds: PriceBounds) -> Self {
        Self {
            selectors,
            parser,
            bounds,
        }
    }

    fn parse_texts(&self, texts: &[String]) -> Vec<RawCandidate> {
        texts
            .iter()
            .flat_map(|text| self.parser.parse(text, MarkerMode::AllowBare))
            .map(|amount| RawCandidate::new(amount, CandidateSource::Dom))
            .collect()
    }
}

#[async_trait]
impl ExtractionStrategy for DomSelectorStrategy {
    fn name(&self) -> &'static str {
        "dom"
    }

    async fn extract(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        for selector in &self.selectors {
            debug!("Trying price selector: {}", selector.name);
            let texts = match session.get_element_texts(&selector.css).await {
                Ok(texts) => texts,
                Err(e) => {
                    debug!("Error with price selector {}: {}", selector.name, e);
                    continue;
                }
            };
            if texts.is_empty() {
                continue;
            }

            let candidates = self.parse_texts(&texts);
            if candidates.iter().any(|c| self.bounds.contains(c.amount)) {
                info!(
                    "Found {} prices with selector: {}",
                    candidates.len(),
                    selector.name
                );
                return candidates;
            }
            debug!(
                "Selector {} matched {} elements but no in-range prices",
                selector.name,
                texts.len()
            );
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakePage;

    const PRICE: &str = r#"[data-testid="item-price"]"#;
    const LEGACY: &str = ".merPrice";

    fn strategy() -> DomSelectorStrategy {
        DomSelectorStrategy::new(
            vec![
                SelectorDescriptor::new("item-price", PRICE),
                SelectorDescriptor::new("merPrice", LEGACY),
            ],
            PriceTextParser::default(),
            PriceBounds::default(),
        )
    }

    fn amounts(candidates: &[RawCandidate]) -> Vec<i64> {
        candidates.iter().map(|c| c.amount).collect()
    }

    #[tokio::test]
    async fn test_texts_without_digits_are_discarded() {
        let page = FakePage::default().with_elements(PRICE, &["¥1,200", "¥15,000", "no price here"]);
        let candidates = strategy().extract(&page).await;
        assert_eq!(amounts(&candidates), vec![1200, 15000]);
        assert!(candidates.iter().all(|c| c.source == CandidateSource::Dom));
    }

    #[tokio::test]
    async fn test_falls_back_to_next_selector() {
        let page = FakePage::default().with_elements(LEGACY, &["3,980"]);
        assert_eq!(amounts(&strategy().extract(&page).await), vec![3980]);
    }

    #[tokio::test]
    async fn test_selector_without_in_range_prices_is_skipped() {
        // First selector only matches item counts, which fall below the bounds
        let page = FakePage::default()
            .with_elements(PRICE, &["3", "12"])
            .with_elements(LEGACY, &["¥4,500"]);
        assert_eq!(amounts(&strategy().extract(&page).await), vec![4500]);
    }

    #[tokio::test]
    async fn test_winning_selector_returns_all_its_candidates() {
        let page = FakePage::default().with_elements(PRICE, &["¥5", "¥5,000"]);
        assert_eq!(amounts(&strategy().extract(&page).await), vec![5, 5000]);
    }

    #[tokio::test]
    async fn test_nothing_matches() {
        assert!(strategy().extract(&FakePage::default()).await.is_empty());
    }
}
