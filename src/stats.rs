//! Store statistics and health overview.
//!
//! Used by `tether stats` to show how much conversation data is stored and
//! whether the reference index is populated.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::index::{RetrievalIndex, SqliteIndex};
use crate::store::{SessionStore, SqliteSessionStore};

/// Run the stats command: query both databases and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = SqliteSessionStore::open(&config.db.path).await?;
    let stats = store.get_stats().await?;
    let latest = store.list_sessions(false, 1).await?;

    let index = SqliteIndex::open(config).await?;
    let passages = index.health_check().await?;

    let db_size = file_size(&config.db.path);
    let index_size = file_size(&config.index.path);

    println!("Tether Store Stats");
    println!("==================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!(
        "  Sessions:    {} active / {} total",
        stats.active_sessions, stats.total_sessions
    );
    println!("  Messages:    {}", stats.total_messages);
    if let Some(session) = latest.first() {
        println!(
            "  Last active: {}",
            format_relative(session.updated_at, Utc::now())
        );
    }

    if !stats.messages_by_role.is_empty() {
        println!();
        println!("  By role:");
        println!("  {:<12} {:>8}", "ROLE", "MESSAGES");
        println!("  {}", "-".repeat(21));
        for (role, count) in &stats.messages_by_role {
            println!("  {:<12} {:>8}", role, count);
        }
    }

    println!();
    println!("  Index:       {}", config.index.path.display());
    println!("  Size:        {}", format_bytes(index_size));
    println!("  Mode:        {}", config.index.mode);
    println!("  Passages:    {}", passages);
    println!();

    Ok(())
}

fn file_size(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Human-readable size using binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// "just now", "5 mins ago", "2 days ago"; absolute beyond a month or in
/// the future.
fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(at);
    let plural = |n: i64, unit: &str| format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" });

    if elapsed < Duration::zero() || elapsed >= Duration::days(30) {
        at.format("%Y-%m-%d %H:%M").to_string()
    } else if elapsed < Duration::minutes(1) {
        "just now".to_string()
    } else if elapsed < Duration::hours(1) {
        plural(elapsed.num_minutes(), "min")
    } else if elapsed < Duration::days(1) {
        plural(elapsed.num_hours(), "hour")
    } else {
        plural(elapsed.num_days(), "day")
    }
}
