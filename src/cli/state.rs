//! Batch state commands.

use console::style;

use crate::config::Config;
use crate::state::{BatchStateStore, JsonFileStateStore};

/// Show the saved batch progress.
pub async fn cmd_state_show(config: &Config) -> anyhow::Result<()> {
    let store = JsonFileStateStore::new(config.state_path());
    let Some(state) = store.read().await? else {
        println!(
            "{} No batch state at {}",
            style("!").yellow(),
            store.path().display()
        );
        return Ok(());
    };

    let today = chrono::Local::now().date_naive();
    println!(
        "\n{}",
        style(format!("Batch State: {}", state.day)).bold()
    );
    println!("{}", "-".repeat(40));
    if state.day != today {
        println!(
            "  {} From an earlier day; the next run starts fresh",
            style("!").yellow()
        );
    }

    let queries = config.search_queries();
    let done = queries.iter().filter(|q| state.is_done(q.id())).count();
    println!("  Completed: {}/{}", done, queries.len());

    for query in &queries {
        let status = if !state.is_done(query.id()) {
            style("pending").dim().to_string()
        } else {
            match state.result(query.id()).and_then(|r| r.median) {
                Some(price) => style(format!("¥{}", price)).green().to_string(),
                None => style("no data").yellow().to_string(),
            }
        };
        println!("  {:<40} {}", query.display_name, status);
    }

    // Entries for keywords no longer in the config
    let orphans: Vec<&String> = state
        .completed
        .iter()
        .filter(|k| !queries.iter().any(|q| q.id() == k.as_str()))
        .collect();
    if !orphans.is_empty() {
        println!("\n  {} not in config:", style(orphans.len()).yellow());
        for keyword in orphans {
            println!("    {}", keyword);
        }
    }

    Ok(())
}

/// Delete the batch state file.
pub async fn cmd_state_reset(config: &Config, confirm: bool) -> anyhow::Result<()> {
    let store = JsonFileStateStore::new(config.state_path());
    if !confirm {
        println!(
            "{} This will delete today's progress at {}.",
            style("!").yellow(),
            store.path().display()
        );
        println!("  The next run will fetch every query again.");
        println!("  Use --confirm to proceed.");
        return Ok(());
    }

    store.clear().await?;
    println!("{} Cleared batch state", style("✓").green());
    Ok(())
}
