//! Offline extraction over a saved page.

use std::path::Path;

use console::style;

use crate::aggregate::{aggregate, PriceBounds};
use crate::config::Config;
use crate::error::ConfigError;
use crate::extract::ExtractionPipeline;
use crate::session::HttpSession;

/// Run the extraction pipeline and aggregator over a saved HTML file.
pub async fn cmd_extract(
    config: &Config,
    html_file: &Path,
    min: Option<i64>,
    max: Option<i64>,
) -> anyhow::Result<()> {
    let bounds = PriceBounds::new(
        min.unwrap_or(config.price_bounds.min),
        max.unwrap_or(config.price_bounds.max),
    );
    if bounds.min > bounds.max {
        return Err(ConfigError::Invalid(format!(
            "--min {} is above --max {}",
            bounds.min, bounds.max
        ))
        .into());
    }

    let html = tokio::fs::read_to_string(html_file).await?;
    let session = HttpSession::from_html(html);
    let pipeline = ExtractionPipeline::standard(&config.extraction_settings(), bounds);

    let candidates = pipeline.run(&session).await;
    let Some(first) = candidates.first() else {
        println!(
            "{} No prices found (tried {})",
            style("✗").red(),
            pipeline.strategy_names().join(", ")
        );
        return Ok(());
    };

    println!(
        "{} {} candidates from {} extraction",
        style("✓").green(),
        candidates.len(),
        style(first.source).cyan()
    );
    let amounts: Vec<String> = candidates.iter().map(|c| c.amount.to_string()).collect();
    println!("  {}", amounts.join(" "));

    let result = aggregate(&candidates, bounds, config.aggregation_policy());
    println!("\n{}", style("Statistics").bold());
    println!("{}", "-".repeat(40));
    match result.median {
        Some(median) => {
            println!("  Median:   ¥{}", median);
            println!("  Min:      ¥{}", result.min.unwrap_or(median));
            println!("  Max:      ¥{}", result.max.unwrap_or(median));
            println!("  Samples:  {}", result.count);
        }
        None => println!(
            "  {} No candidates within ¥{}-¥{}",
            style("!").yellow(),
            bounds.min,
            bounds.max
        ),
    }

    Ok(())
}
