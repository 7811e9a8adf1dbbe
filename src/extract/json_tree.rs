//! Extraction from the embedded page-data script node.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{CandidateSource, ExtractionStrategy, RawCandidate};
use crate::session::PageSession;
use crate::walker::{find_leaves, has_numeric_price};

const STATUS_FIELD: &str = "status";

/// Reads item records out of the JSON payload in a `<script id=...>` node.
pub struct JsonTreeStrategy {
    script_node_id: String,
    on_sale_statuses: Vec<String>,
}

impl JsonTreeStrategy {
    pub fn new(script_node_id: impl Into<String>, on_sale_statuses: Vec<String>) -> Self {
        Self {
            script_node_id: script_node_id.into(),
            on_sale_statuses,
        }
    }

    /// Items without a status are kept; items with one must be on sale.
    fn is_on_sale(&self, item: &Map<String, Value>) -> bool {
        match item.get(STATUS_FIELD) {
            None => true,
            Some(Value::String(status)) => self.on_sale_statuses.iter().any(|s| s == status),
            Some(_) => false,
        }
    }

    /// Candidates from an already-parsed payload.
    pub fn candidates_from(&self, data: &Value) -> Vec<RawCandidate> {
        find_leaves(data, has_numeric_price)
            .into_iter()
            .filter(|item| self.is_on_sale(item))
            .filter_map(|item| price_amount(item.get("price")?))
            .map(|amount| RawCandidate::new(amount, CandidateSource::Json))
            .collect()
    }
}

fn price_amount(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f.round() as i64))
}

#[async_trait]
impl ExtractionStrategy for JsonTreeStrategy {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn extract(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        let mut candidates = self.script_candidates(session).await;
        debug!("JSON price count = {}", candidates.len());

        let api = self.api_candidates(session).await;
        if !api.is_empty() {
            debug!("API price count = {}", api.len());
            candidates.extend(api);
        }
        candidates
    }
}

impl JsonTreeStrategy {
    async fn script_candidates(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        let raw = match session.get_script_text(&self.script_node_id).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("Could not read script node {}: {}", self.script_node_id, e);
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            debug!("Script node {} is empty or missing", self.script_node_id);
            return Vec::new();
        }

        match serde_json::from_str::<Value>(&raw) {
            Ok(data) => self.candidates_from(&data),
            Err(e) => {
                warn!("JSON parse error in {}: {}", self.script_node_id, e);
                Vec::new()
            }
        }
    }

    /// Captured search API responses go through the same walk.
    async fn api_candidates(&self, session: &dyn PageSession) -> Vec<RawCandidate> {
        let payloads = match session.get_api_payloads().await {
            Ok(payloads) => payloads,
            Err(e) => {
                debug!("Could not read API responses: {}", e);
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        for body in payloads {
            match serde_json::from_str::<Value>(&body) {
                Ok(data) => candidates.extend(self.candidates_from(&data)),
                Err(e) => warn!("Error parsing API response: {}", e),
            }
        }
        candidates
    }
}
