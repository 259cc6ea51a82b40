//! Core data models used throughout Tether.
//!
//! These types represent the sessions, messages, and checklist items that the
//! [`SessionStore`](crate::store::SessionStore) persists, plus the closed
//! enums (role, mode, detective sub-mode) that select replay and prompting
//! rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::TetherError;

/// Author of a message.
///
/// Stored as `human`, `ai`, `system`, `tool`. On input the aliases `user`
/// and `assistant` are accepted and normalized onto the same variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "human", alias = "user")]
    User,
    #[serde(rename = "ai", alias = "assistant")]
    Assistant,
    #[serde(rename = "system")]
    System,
    #[serde(rename = "tool")]
    Tool,
}

impl Role {
    /// Storage form of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "human",
            Self::Assistant => "ai",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    /// Role name in the chat-completions wire format.
    pub fn api_role(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl FromStr for Role {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" | "user" => Ok(Self::User),
            "ai" | "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(TetherError::validation(format!(
                "invalid message role '{}': must be one of human, ai, system, tool, user, assistant",
                other
            ))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Behavioral profile selecting the system-prompt template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    General,
    Planner,
    Builder,
    Detective,
    Reviewer,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::General,
        Mode::Planner,
        Mode::Builder,
        Mode::Detective,
        Mode::Reviewer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Detective => "detective",
            Self::Reviewer => "reviewer",
        }
    }
}

impl FromStr for Mode {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "planner" => Ok(Self::Planner),
            "builder" => Ok(Self::Builder),
            "detective" => Ok(Self::Detective),
            "reviewer" => Ok(Self::Reviewer),
            other => Err(TetherError::validation(format!(
                "invalid mode '{}': must be one of general, planner, builder, detective, reviewer",
                other
            ))),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sub-mode of [`Mode::Detective`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetectiveMode {
    #[default]
    #[serde(rename = "teaching")]
    Teaching,
    #[serde(rename = "quick-fix", alias = "quick_fix")]
    QuickFix,
}

impl DetectiveMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Teaching => "teaching",
            Self::QuickFix => "quick-fix",
        }
    }
}

impl FromStr for DetectiveMode {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teaching" => Ok(Self::Teaching),
            "quick-fix" | "quick_fix" | "quickfix" => Ok(Self::QuickFix),
            other => Err(TetherError::validation(format!(
                "invalid detective_mode '{}': must be teaching or quick-fix",
                other
            ))),
        }
    }
}

/// A conversation session row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub is_active: bool,
}

/// A persisted message. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub mode: Mode,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// True for assistant messages that only requested a tool call.
    pub fn is_tool_request(&self) -> bool {
        self.role == Role::Assistant
            && self
                .metadata
                .get("tool_calls")
                .and_then(|v| v.as_array())
                .is_some_and(|calls| !calls.is_empty())
    }
}

/// A task row attached to a planner-mode assistant message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    pub id: i64,
    pub task_text: String,
    pub is_completed: bool,
    pub position: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input shape for [`SessionStore::save_checklist`](crate::store::SessionStore::save_checklist).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewChecklistItem {
    pub task_text: String,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub position: Option<i64>,
}

impl NewChecklistItem {
    pub fn new(task_text: impl Into<String>) -> Self {
        Self {
            task_text: task_text.into(),
            is_completed: false,
            position: None,
        }
    }
}

/// Aggregate counts over the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub active_sessions: i64,
    pub total_sessions: i64,
    pub total_messages: i64,
    pub messages_by_role: BTreeMap<String, i64>,
}

/// Convert epoch milliseconds to a UTC timestamp (falls back to the epoch).
pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}
