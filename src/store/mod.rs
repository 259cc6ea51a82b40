//! Conversation persistence.
//!
//! The [`SessionStore`] trait is the only way the rest of the crate touches
//! persisted rows: the orchestrator and the HTTP layer issue intent-level
//! operations (append a message, rename, deactivate) and never write SQL
//! themselves. [`SqliteSessionStore`] is the production backend.
//!
//! Every method is a single atomic unit; there are no transactions spanning
//! calls.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`create_session`](SessionStore::create_session) | Upsert a session row |
//! | [`get_session`](SessionStore::get_session) | Fetch an active session |
//! | [`list_sessions`](SessionStore::list_sessions) | Most recently updated first |
//! | [`rename_session`](SessionStore::rename_session) | Set the display name |
//! | [`deactivate_session`](SessionStore::deactivate_session) | Soft delete, purge messages |
//! | [`delete_session`](SessionStore::delete_session) | Hard delete with cascade |
//! | [`append_message`](SessionStore::append_message) | Insert a message, bump `updated_at` |
//! | [`get_history`](SessionStore::get_history) | Oldest `limit` messages, in order |
//! | [`get_recent_history`](SessionStore::get_recent_history) | Newest `limit` messages, in order |
//! | [`get_stats`](SessionStore::get_stats) | Aggregate counts |
//! | [`save_checklist`](SessionStore::save_checklist) | Replace a message's checklist |
//! | [`get_checklist`](SessionStore::get_checklist) | Items ordered by position |
//! | [`update_item_completion`](SessionStore::update_item_completion) | Toggle one item |
//! | [`delete_checklist`](SessionStore::delete_checklist) | Remove a message's checklist |

mod sqlite;

pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TetherResult;
use crate::models::{ChecklistItem, Message, Mode, NewChecklistItem, Session, StoreStats};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session. Generates a UUID when `id` is `None`.
    ///
    /// Replacing an existing id overwrites its name and metadata and marks it
    /// active again; its messages are kept.
    async fn create_session(
        &self,
        id: Option<&str>,
        name: Option<&str>,
        metadata: Option<&Value>,
    ) -> TetherResult<String>;

    /// Returns the session only while it is active.
    async fn get_session(&self, id: &str) -> TetherResult<Option<Session>>;

    async fn list_sessions(&self, active_only: bool, limit: i64) -> TetherResult<Vec<Session>>;

    /// `NotFound` for a missing or inactive session.
    async fn rename_session(&self, id: &str, name: &str) -> TetherResult<()>;

    /// Soft delete: marks the session inactive and deletes its messages.
    /// Calling it on an already inactive session changes nothing.
    async fn deactivate_session(&self, id: &str) -> TetherResult<()>;

    /// Hard delete: removes the row, cascading to messages and checklists.
    async fn delete_session(&self, id: &str) -> TetherResult<()>;

    /// Append a message and bump the session's `updated_at`.
    ///
    /// `role` accepts `human`, `ai`, `system`, `tool` and the aliases `user`
    /// and `assistant`. Fails with `NotFound` when the session row is absent.
    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: Option<&Value>,
        mode: Option<Mode>,
    ) -> TetherResult<i64>;

    /// Messages in conversational order, truncated to the **oldest** `limit`.
    async fn get_history(&self, session_id: &str, limit: i64) -> TetherResult<Vec<Message>>;

    /// Messages in conversational order, truncated to the **newest** `limit`.
    async fn get_recent_history(&self, session_id: &str, limit: i64)
        -> TetherResult<Vec<Message>>;

    async fn get_stats(&self) -> TetherResult<StoreStats>;

    /// Replace the checklist attached to `(session_id, message_id)`.
    async fn save_checklist(
        &self,
        session_id: &str,
        message_id: i64,
        items: &[NewChecklistItem],
    ) -> TetherResult<Vec<ChecklistItem>>;

    async fn get_checklist(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> TetherResult<Vec<ChecklistItem>>;

    /// Returns `false` when no item has this id.
    async fn update_item_completion(&self, item_id: i64, completed: bool) -> TetherResult<bool>;

    /// Returns the number of items removed.
    async fn delete_checklist(&self, session_id: &str, message_id: i64) -> TetherResult<u64>;
}
