//! Desktop activity summaries for the decide-step prompt.
//!
//! The desktop client sends raw focus/idle events with each turn.
//! [`summarize_activity`] folds them into a per-day digest plus a few
//! pattern insights the model can quote back when the user asks what they
//! were doing.
//!
//! # Output Shape
//!
//! ```text
//!
//! USER'S RECENT ACTIVITY HISTORY:
//! - Today (2024-03-15): Used Code (2 times), Firefox (1 times)
//! -   - Active from 09:00 to 09:20
//! -   - Key activities: 09:00: main.rs; 09:05: Docs; 09:20: lib.rs
//!
//! ACTIVITY PATTERNS & INSIGHTS:
//! - Good focus session detected: 15.0 minutes in Firefox.
//! ```

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Idle periods at or below this many seconds are ignored.
const MIN_IDLE_SECS: f64 = 60.0;
/// Average idle above this many seconds is reported.
const LONG_IDLE_SECS: f64 = 300.0;
/// Gaps of an hour or more are not credited to the app in front.
const MAX_FOCUS_GAP_MS: i64 = 3_600_000;
/// Accumulated time above this is a focus session.
const FOCUS_THRESHOLD_MS: i64 = 600_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Epoch milliseconds. Zero means unknown; such events are skipped.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: ActivityKind,
    #[serde(default)]
    pub data: ActivityData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    WindowChange,
    Idle,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityData {
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default)]
    pub window_title: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub idle_duration: Option<f64>,
    #[serde(default)]
    pub was_idle: bool,
}

struct WindowChange {
    time: String,
    app: String,
    title: String,
}

#[derive(Default)]
struct Day {
    window_changes: Vec<WindowChange>,
}

/// Summarize with the local time zone and today's local date.
pub fn summarize_activity_local(events: &[ActivityEvent]) -> String {
    summarize_activity(events, &Local, Local::now().date_naive())
}

/// Summarize `events` into the prompt block. Returns an empty string when
/// `events` is empty.
///
/// Days are bucketed in `tz`; `today` decides the `Today`/`Yesterday` labels.
pub fn summarize_activity<Tz>(events: &[ActivityEvent], tz: &Tz, today: NaiveDate) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    if events.is_empty() {
        return String::new();
    }

    let mut ordered: Vec<&ActivityEvent> = events.iter().filter(|e| e.timestamp != 0).collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut days: BTreeMap<NaiveDate, Day> = BTreeMap::new();
    let mut switches: Vec<(&str, i64)> = Vec::new();
    let mut idle_periods: Vec<f64> = Vec::new();

    for event in ordered {
        let Some(dt) = tz.timestamp_millis_opt(event.timestamp).single() else {
            continue;
        };
        let day = days.entry(dt.date_naive()).or_default();

        match event.kind {
            ActivityKind::WindowChange => {
                let app = event.data.application_name.as_deref().unwrap_or("Unknown");
                day.window_changes.push(WindowChange {
                    time: hh_mm(&dt),
                    app: app.to_string(),
                    title: event.data.window_title.clone().unwrap_or_default(),
                });
                switches.push((app, event.timestamp));
            }
            ActivityKind::Idle => {
                let duration = event.data.idle_duration.unwrap_or(0.0);
                if event.data.was_idle && duration > MIN_IDLE_SECS {
                    idle_periods.push(duration);
                }
            }
            ActivityKind::Other => {}
        }
    }

    let day_lines = day_summaries(&days, today);
    let insights = insights(&switches, &idle_periods);

    let mut parts: Vec<String> = Vec::new();
    if !day_lines.is_empty() {
        parts.push("USER'S RECENT ACTIVITY HISTORY:".to_string());
        parts.extend(day_lines.into_iter().map(|l| format!("- {}", l)));
        parts.push(String::new());
    }
    if !insights.is_empty() {
        parts.push("ACTIVITY PATTERNS & INSIGHTS:".to_string());
        parts.extend(insights.into_iter().map(|l| format!("- {}", l)));
        parts.push(String::new());
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("\n{}", parts.join("\n"))
    }
}

fn hh_mm<Tz>(dt: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    dt.format("%H:%M").to_string()
}

fn day_summaries(days: &BTreeMap<NaiveDate, Day>, today: NaiveDate) -> Vec<String> {
    let yesterday = today.pred_opt();
    let mut lines = Vec::new();

    for (date, day) in days.iter().rev() {
        if day.window_changes.is_empty() {
            continue;
        }
        let key = date.format("%Y-%m-%d").to_string();
        let label = if *date == today {
            "Today".to_string()
        } else if Some(*date) == yesterday {
            "Yesterday".to_string()
        } else {
            key.clone()
        };

        let mut counts = counts_in_first_seen_order(day.window_changes.iter().map(|w| w.app.as_str()));
        // Stable, so equal counts keep first-seen order.
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let top = counts
            .iter()
            .take(3)
            .map(|(app, n)| format!("{} ({} times)", app, n))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("{} ({}): Used {}", label, key, top));

        // window_changes is non-empty here
        let first = &day.window_changes[0].time;
        let last = &day.window_changes[day.window_changes.len() - 1].time;
        lines.push(format!("  - Active from {} to {}", first, last));

        let titles: Vec<String> = day
            .window_changes
            .iter()
            .filter(|w| !w.title.is_empty() && !w.title.contains("No Window"))
            .take(3)
            .map(|w| format!("{}: {}", w.time, w.title))
            .collect();
        if !titles.is_empty() {
            lines.push(format!("  - Key activities: {}", titles.join("; ")));
        }
    }
    lines
}

fn insights(switches: &[(&str, i64)], idle_periods: &[f64]) -> Vec<String> {
    let mut out = Vec::new();

    if switches.len() > 10 {
        let unique = counts_in_first_seen_order(switches.iter().map(|(app, _)| *app)).len();
        out.push(format!(
            "High task switching detected: {} app changes across {} applications in recent days.",
            switches.len(),
            unique
        ));
    }

    let counts = counts_in_first_seen_order(switches.iter().map(|(app, _)| *app));
    if let Some((app, n)) = first_max(&counts) {
        if n > 5 {
            out.push(format!(
                "Most frequently used application: {} ({} interactions).",
                app, n
            ));
        }
    }

    if !idle_periods.is_empty() {
        let avg = idle_periods.iter().sum::<f64>() / idle_periods.len() as f64;
        if avg > LONG_IDLE_SECS {
            out.push(format!(
                "Extended idle periods detected (avg {:.1} minutes).",
                avg / 60.0
            ));
        }
    }

    if let Some((app, ms)) = longest_focus(switches) {
        out.push(format!(
            "Good focus session detected: {:.1} minutes in {}.",
            ms as f64 / 60_000.0,
            app
        ));
    }

    if switches.len() > 20 {
        out.push(
            "Consider using a focus technique like Pomodoro or time-blocking to reduce context switching."
                .to_string(),
        );
    } else if switches.len() < 3 {
        out.push(
            "Low activity detected. If you're stuck, try the 2-minute rule or breaking tasks into smaller steps."
                .to_string(),
        );
    }

    out
}

/// Credit each gap between consecutive switches to the app that was in front.
fn longest_focus<'a>(switches: &[(&'a str, i64)]) -> Option<(&'a str, i64)> {
    let mut durations: Vec<(&str, i64)> = Vec::new();

    for pair in switches.windows(2) {
        let (app, start) = pair[0];
        let gap = pair[1].1 - start;
        if gap > 0 && gap < MAX_FOCUS_GAP_MS {
            match durations.iter_mut().find(|(a, _)| *a == app) {
                Some(entry) => entry.1 += gap,
                None => durations.push((app, gap)),
            }
        }
    }

    let focused: Vec<(&str, i64)> = durations
        .into_iter()
        .filter(|(_, ms)| *ms > FOCUS_THRESHOLD_MS)
        .collect();
    first_max(&focused)
}

fn counts_in_first_seen_order<'a>(apps: impl Iterator<Item = &'a str>) -> Vec<(&'a str, usize)> {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for app in apps {
        match counts.iter_mut().find(|(a, _)| *a == app) {
            Some(entry) => entry.1 += 1,
            None => counts.push((app, 1)),
        }
    }
    counts
}

/// The largest value; ties go to the earliest entry.
fn first_max<'a, N: PartialOrd + Copy>(items: &[(&'a str, N)]) -> Option<(&'a str, N)> {
    let mut best: Option<(&str, N)> = None;
    for &(key, value) in items {
        match best {
            Some((_, b)) if value <= b => {}
            _ => best = Some((key, value)),
        }
    }
    best
}
