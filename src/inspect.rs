//! One-shot diagnostics for the `check` and `state` commands.

use anyhow::Result;

use frigate_relay_core::models::DeliveryOutcome;
use frigate_relay_core::store::StateStore;

use crate::config::Config;
use crate::db;
use crate::frigate::{FrigateClient, Nvr};
use crate::migrate::apply_schema;
use crate::pipeline::CURSOR_SOURCE;
use crate::sqlite_store::SqliteStore;

/// Print the normalized camera/zone matrix and whether the NVR answers.
pub async fn run_check(config: &Config) -> Result<()> {
    let parsed = config.monitor.parse()?;

    println!("Frigate Relay: Configuration Check");
    println!("==================================");
    println!();
    println!("  NVR:          {}", config.nvr.base_url());
    println!(
        "  External URL: {}",
        config.nvr.external_base_url().unwrap_or("not configured")
    );
    println!(
        "  Auth:         {}",
        if config.nvr.credentials().is_some() {
            "basic"
        } else {
            "none"
        }
    );
    println!("  Chat:         {}", config.telegram.chat_id);
    println!("  Interval:     {}s", config.polling.interval_secs);
    println!(
        "  Display:      {} ({})",
        config.display.timezone, config.display.locale
    );
    println!();
    println!("  Monitored:");
    for line in parsed.config.describe() {
        println!("    {}", line);
    }
    for entry in &parsed.skipped {
        println!("    (ignored malformed entry: {:?})", entry);
    }
    println!();

    let nvr = FrigateClient::new(config)?;
    match nvr.version().await {
        Ok(version) => println!("  NVR reachable, version {}", version),
        Err(e) => println!("  NVR unreachable: {:#}", e),
    }

    Ok(())
}

/// Print what is persisted: toggle, cursor, dedup window.
pub async fn run_state(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store = SqliteStore::new(pool);

    let toggle = store.load_toggle().await?.unwrap_or_default();
    let cursor = store.load_cursor(CURSOR_SOURCE).await?;
    let dedup = store.load_dedup().await?;
    let delivered = dedup
        .iter()
        .filter(|e| e.outcome == DeliveryOutcome::Delivered)
        .count();

    println!("Frigate Relay: Persisted State");
    println!("==============================");
    println!();
    println!("  Database:      {}", config.state.path.display());
    println!(
        "  Notifications: {} (revision {}, changed {})",
        if toggle.enabled { "enabled" } else { "disabled" },
        toggle.revision,
        format_ts(toggle.updated_at)
    );
    println!(
        "  Poll cursor:   {}",
        cursor
            .map(|c| format_ts(c as i64))
            .unwrap_or_else(|| "none".to_string())
    );
    println!(
        "  Dedup window:  {} entries ({} delivered, {} abandoned)",
        dedup.len(),
        delivered,
        dedup.len() - delivered
    );
    if let Some(last) = dedup.last() {
        println!(
            "  Last resolved: {} ({}, {})",
            last.event_id,
            last.outcome.as_str(),
            format_ts(last.resolved_at)
        );
    }

    store.pool().close().await;
    Ok(())
}

fn format_ts(ts: i64) -> String {
    if ts <= 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "never");
        assert_eq!(format_ts(1_672_531_200), "2023-01-01 00:00:00 UTC");
    }
}
