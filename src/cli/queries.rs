//! List configured queries.

use console::style;

use crate::config::Config;

pub fn cmd_queries(config: &Config) -> anyhow::Result<()> {
    let queries = config.search_queries();
    if queries.is_empty() {
        println!("{} No queries configured", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Tracked Products").bold());
    println!("{}", "-".repeat(60));
    for query in &queries {
        println!("  {}", style(&query.display_name).cyan());
        println!("    keyword: {}", query.keyword);
        println!(
            "    bounds:  ¥{}-¥{}",
            query.price_bounds.min, query.price_bounds.max
        );
    }
    Ok(())
}
