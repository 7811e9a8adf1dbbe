//! Last-resort extraction: currency-marked numbers anywhere in the page.

use async_trait::async_trait;
use tracing::{debug, info};

use super::price_text::{MarkerMode, PriceTextParser};
use super::{CandidateSource, ExtractionStrategy, RawCandidate};
use crate::session::PageSession;

pub struct RawTextStrategy {
    parser: PriceTextParser,
}

impl RawTextStrategy {
    pub fn new(parser: PriceTextParser) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl ExtractionStrategy for RawTextStrategy {
    fn name(&self) -> &'static str {
        "regex"
    }

    async fn extract(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        let text = match session.get_full_page_text().await {
            Ok(text) => text,
            Err(e) => {
                debug!("Could not read page text: {}", e);
                return Vec::new();
            }
        };

        let candidates: Vec<RawCandidate> = self
            .parser
            .parse(&text, MarkerMode::MarkedOnly)
            .into_iter()
            .map(|amount| RawCandidate::new(amount, CandidateSource::Regex))
            .collect();
        if !candidates.is_empty() {
            info!("Found {} prices with direct regex", candidates.len());
        }
        candidates
    }
}
