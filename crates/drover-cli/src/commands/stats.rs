//! `drover models stats` — today's totals or a per-day trend.

use anyhow::Result;
use drover_usage::UsageStore;

pub fn run(config_path: Option<&str>, days: Option<u32>, json: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let store = UsageStore::open(&config.database.path)?;

    match days {
        Some(days) => trend(&store, days, json),
        None => today(&store, config.daily_token_limit, json),
    }
}

fn today(store: &UsageStore, daily_limit: Option<u64>, json: bool) -> Result<()> {
    let totals = store.daily_usage_by_provider()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&totals)?);
        return Ok(());
    }

    if totals.is_empty() {
        println!("no usage recorded today");
    } else {
        println!("today:");
        for (provider, tokens) in &totals {
            println!("  {provider:<20} {tokens:>12} tokens");
        }
    }
    if let Some(limit) = daily_limit {
        let used: u64 = totals.values().sum();
        println!("quota: {used} / {limit} tokens");
        if used >= limit {
            println!("  ! daily quota exhausted, chat requests will be refused");
        }
    }
    Ok(())
}

fn trend(store: &UsageStore, days: u32, json: bool) -> Result<()> {
    let summary = store.usage_summary(days)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.is_empty() {
        println!("no usage recorded in the last {days} days");
        return Ok(());
    }
    println!("{:<12} {:<20} {:>12} {:>10}", "day", "provider", "tokens", "cost");
    for row in summary {
        println!(
            "{:<12} {:<20} {:>12} {:>10.4}",
            row.day, row.provider, row.tokens, row.cost_usd
        );
    }
    Ok(())
}
