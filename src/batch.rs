//! Daily batch: run every tracked query once per day, resumably.
//!
//! Progress is persisted after each query, so an interrupted run picks up
//! where it stopped. Queries already completed today are skipped. Output rows
//! are written once, at the end, for every configured query.

use std::time::Duration;

use chrono::NaiveDate;
use indicatif::ProgressBar;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::aggregate::{aggregate, AggregationPolicy, AggregationResult};
use crate::config::{build_search_url, Config, SearchQuery};
use crate::error::PersistenceError;
use crate::extract::{ExtractionPipeline, ExtractionSettings};
use crate::output::{OutputRow, ResultSink};
use crate::retry::{RetryController, RetryPolicy, Sleeper};
use crate::session::PageSession;
use crate::state::BatchStateStore;

/// Tunables for one batch run.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub search_url_template: String,
    pub navigation_timeout: Duration,
    pub extraction: ExtractionSettings,
    pub retry: RetryPolicy,
    pub aggregation: AggregationPolicy,
    /// Inclusive range for the pause between two processed queries.
    pub request_delay: (Duration, Duration),
}

impl BatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            search_url_template: config.search_url_template.clone(),
            navigation_timeout: config.navigation_timeout(),
            extraction: config.extraction_settings(),
            retry: config.retry_policy(),
            aggregation: config.aggregation_policy(),
            request_delay: config.request_delay_range(),
        }
    }
}

/// Counts for a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    /// Queries fetched in this run.
    pub processed: usize,
    /// Queries already completed earlier today.
    pub skipped: usize,
    /// Processed queries that produced a price.
    pub priced: usize,
    /// Processed queries that ended without a price.
    pub unpriced: usize,
    /// Rows handed to the sink, one per configured query.
    pub rows: Vec<OutputRow>,
}

/// Drives the per-query fetch, extract, aggregate and persist cycle.
pub struct BatchOrchestrator<'a> {
    session: Mutex<Box<dyn PageSession>>,
    store: &'a dyn BatchStateStore,
    sink: &'a dyn ResultSink,
    sleeper: &'a dyn Sleeper,
    settings: BatchSettings,
    progress: Option<ProgressBar>,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        session: Box<dyn PageSession>,
        store: &'a dyn BatchStateStore,
        sink: &'a dyn ResultSink,
        sleeper: &'a dyn Sleeper,
        settings: BatchSettings,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            store,
            sink,
            sleeper,
            settings,
            progress: None,
        }
    }

    /// Report per-query progress on a bar. Its length is set when the run starts.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run all pending queries for `today` and write the output rows.
    ///
    /// Fetch and extraction failures never abort the run; only state or
    /// output persistence errors do.
    pub async fn run(
        &self,
        queries: &[SearchQuery],
        today: NaiveDate,
    ) -> Result<BatchReport, PersistenceError> {
        let mut state = self.store.load(today).await?;
        let pending: Vec<&SearchQuery> = queries.iter().filter(|q| !state.is_done(q.id())).collect();

        let mut report = BatchReport {
            skipped: queries.len() - pending.len(),
            ..Default::default()
        };
        if report.skipped > 0 {
            info!("Skipping {} queries already done today", report.skipped);
        }
        if let Some(pb) = &self.progress {
            pb.set_length(pending.len() as u64);
        }

        for (i, query) in pending.iter().enumerate() {
            if i > 0 {
                let delay = self.next_delay();
                info!("Waiting {:.1}s before next query", delay.as_secs_f64());
                self.sleeper.sleep(delay).await;
            }
            if let Some(pb) = &self.progress {
                pb.set_message(query.display_name.clone());
            }

            let result = self.process(query).await;
            match result {
                Some(_) => report.priced += 1,
                None => report.unpriced += 1,
            }
            report.processed += 1;
            self.store.mark_done(&mut state, query.id(), result).await?;

            if let Some(pb) = &self.progress {
                pb.inc(1);
            }
        }

        report.rows = queries
            .iter()
            .map(|q| OutputRow {
                date: today,
                product: q.display_name.clone(),
                result: state.result(q.id()),
            })
            .collect();
        self.sink.write_rows(&report.rows)?;

        Ok(report)
    }

    /// Fetch and summarize one query. `None` means no usable price.
    async fn process(&self, query: &SearchQuery) -> Option<AggregationResult> {
        let url = build_search_url(&self.settings.search_url_template, &query.keyword);
        let pipeline = ExtractionPipeline::standard(&self.settings.extraction, query.price_bounds);
        let controller = RetryController::new(self.settings.retry, self.sleeper);
        let timeout = self.settings.navigation_timeout;

        info!("Searching '{}'", query.display_name);
        let candidates = controller
            .run(&query.display_name, |_| {
                let session = &self.session;
                let url = url.as_str();
                let pipeline = &pipeline;
                async move {
                    let mut session = session.lock().await;
                    session.navigate(url, timeout).await?;
                    Ok(pipeline.run(&**session).await)
                }
            })
            .await;

        let result = aggregate(&candidates, query.price_bounds, self.settings.aggregation);
        match result.median {
            Some(median) => {
                info!(
                    "{}: median ¥{} over {} listings (¥{}-¥{})",
                    query.display_name,
                    median,
                    result.count,
                    result.min.unwrap_or(median),
                    result.max.unwrap_or(median)
                );
                Some(result)
            }
            None => {
                warn!(
                    "{}: no prices within ¥{}-¥{}",
                    query.display_name, query.price_bounds.min, query.price_bounds.max
                );
                None
            }
        }
    }

    fn next_delay(&self) -> Duration {
        let (lo, hi) = self.settings.request_delay;
        if hi <= lo {
            return lo;
        }
        let ms = rand::rng().random_range(lo.as_millis()..=hi.as_millis());
        Duration::from_millis(ms as u64)
    }

    /// Close the page session.
    pub async fn shutdown(self) {
        self.session.into_inner().close().await;
    }
}
