//! Terminal front end.
//!
//! Backs the `tether init`, `chat`, `sessions`, `history` and `activity`
//! commands. Everything here goes through the same store and orchestrator
//! the HTTP server uses.

use anyhow::{bail, Context, Result};
use std::path::Path;

use crate::activity::{summarize_activity_local, ActivityEvent};
use crate::config::Config;
use crate::index::{RetrievalIndex, SqliteIndex};
use crate::models::{DetectiveMode, Mode};
use crate::orchestrator::{Orchestrator, TurnRequest};
use crate::store::{SessionStore, SqliteSessionStore};

/// Create both databases and their schemas. Safe to run repeatedly.
pub async fn run_init(config: &Config) -> Result<()> {
    SqliteSessionStore::open(&config.db.path).await?;
    let index = SqliteIndex::open(config).await?;
    let passages = index.health_check().await?;

    println!("Conversation store ready at {}", config.db.path.display());
    println!(
        "Reference index ready at {} ({} passages)",
        config.index.path.display(),
        passages
    );
    Ok(())
}

pub struct ChatArgs<'a> {
    pub session: &'a str,
    pub message: &'a str,
    pub mode: Mode,
    pub detective_mode: DetectiveMode,
    pub activity: Option<&'a Path>,
    pub create: bool,
}

/// Run a single turn and print the answer.
pub async fn run_chat(config: &Config, args: ChatArgs<'_>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(config).await?;

    if args.create {
        orchestrator
            .store()
            .create_session(Some(args.session), None, None)
            .await?;
    } else if orchestrator.store().get_session(args.session).await?.is_none() {
        bail!(
            "no active session '{}'. Pass --new to start one.",
            args.session
        );
    }

    let activity_context = match args.activity {
        Some(path) => load_events(path)?,
        None => Vec::new(),
    };

    let request = TurnRequest {
        message: args.message.to_string(),
        session_id: args.session.to_string(),
        activity_context,
        mode: args.mode,
        detective_mode: args.detective_mode,
    };
    let outcome = orchestrator.process_turn(&request).await?;

    println!("{}", outcome.response);
    if !outcome.tasks.is_empty() {
        println!();
        println!("Checklist ({} tasks, message {}):", outcome.tasks.len(), outcome.message_id);
        for (i, task) in outcome.tasks.iter().enumerate() {
            println!("  {}. {}", i + 1, task);
        }
    }
    Ok(())
}

pub async fn run_sessions(config: &Config, all: bool, limit: i64) -> Result<()> {
    let store = SqliteSessionStore::open(&config.db.path).await?;
    let sessions = store.list_sessions(!all, limit).await?;

    if sessions.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    println!("{:<38} {:<32} {:<17} {}", "ID", "NAME", "UPDATED", "ACTIVE");
    for s in &sessions {
        println!(
            "{:<38} {:<32} {:<17} {}",
            s.id,
            truncate(s.name.as_deref().unwrap_or("-"), 30),
            s.updated_at.format("%Y-%m-%d %H:%M"),
            if s.is_active { "yes" } else { "no" }
        );
    }
    Ok(())
}

pub async fn run_history(config: &Config, session: &str, limit: i64) -> Result<()> {
    let store = SqliteSessionStore::open(&config.db.path).await?;
    let messages = store.get_history(session, limit).await?;

    if messages.is_empty() {
        println!("No messages.");
        return Ok(());
    }

    for m in &messages {
        println!(
            "[{}] {} ({}):",
            m.created_at.format("%Y-%m-%d %H:%M:%S"),
            m.role,
            m.mode
        );
        println!("{}", m.content);
        println!();
    }
    Ok(())
}

/// Print the activity digest a turn would carry for this event file.
pub fn run_activity(path: &Path) -> Result<()> {
    let events = load_events(path)?;
    let summary = summarize_activity_local(&events);
    if summary.is_empty() {
        println!("No activity.");
    } else {
        println!("{}", summary.trim_start());
    }
    Ok(())
}

fn load_events(path: &Path) -> Result<Vec<ActivityEvent>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read activity file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse activity file: {}", path.display()))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 1).collect();
        format!("{}…", head)
    }
}
