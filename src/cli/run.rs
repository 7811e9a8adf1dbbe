//! The daily batch command.

use std::path::PathBuf;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{BatchOrchestrator, BatchSettings};
use crate::config::Config;
use crate::error::ConfigError;
use crate::output::CsvSink;
use crate::retry::TokioSleeper;
use crate::session::{HttpSession, PageSession};
use crate::state::{BatchStateStore, JsonFileStateStore};

pub struct RunOptions {
    pub http: bool,
    pub output: Option<PathBuf>,
    pub extended: bool,
    pub fresh: bool,
}

fn open_session(config: &Config, http: bool) -> anyhow::Result<Box<dyn PageSession>> {
    if http {
        return Ok(Box::new(HttpSession::new(&config.user_agent)?));
    }
    open_browser(config)
}

#[cfg(feature = "browser")]
fn open_browser(config: &Config) -> anyhow::Result<Box<dyn PageSession>> {
    Ok(Box::new(crate::session::BrowserSession::new(
        config.browser_session_config(),
    )))
}

#[cfg(not(feature = "browser"))]
fn open_browser(_config: &Config) -> anyhow::Result<Box<dyn PageSession>> {
    anyhow::bail!("Built without browser support; rerun with --http")
}

/// Run today's batch and append the results to the output CSV.
pub async fn cmd_run(config: &Config, options: RunOptions) -> anyhow::Result<()> {
    let queries = config.search_queries();
    if queries.is_empty() {
        return Err(ConfigError::Invalid("no queries configured".to_string()).into());
    }

    let store = JsonFileStateStore::new(config.state_path());
    if options.fresh {
        store.clear().await?;
        println!("{} Discarded saved progress", style("!").yellow());
    }

    let output_path = options.output.unwrap_or_else(|| config.output_path());
    let sink = CsvSink::new(&output_path, options.extended || config.extended_output);
    let sleeper = TokioSleeper;
    let session = open_session(config, options.http)?;

    let pb = ProgressBar::new(queries.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap()
            .progress_chars("█▓░"),
    );

    let orchestrator = BatchOrchestrator::new(
        session,
        &store,
        &sink,
        &sleeper,
        BatchSettings::from_config(config),
    )
    .with_progress(pb.clone());

    let today = chrono::Local::now().date_naive();
    let result = orchestrator.run(&queries, today).await;
    orchestrator.shutdown().await;
    pb.finish_and_clear();
    let report = result?;

    for row in &report.rows {
        match row.median() {
            Some(price) => println!("  {} {}: ¥{}", style("✓").green(), row.product, price),
            None => println!("  {} {}: no data", style("✗").red(), row.product),
        }
    }
    println!(
        "\n{} {} processed, {} skipped ({} priced, {} without data)",
        style("✓").green(),
        report.processed,
        report.skipped,
        report.priced,
        report.unpriced
    );
    println!("  Results appended to {}", output_path.display());

    Ok(())
}
