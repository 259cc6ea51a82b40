//! SQLite-backed [`SessionStore`].
//!
//! Maps each store operation to one transaction against the schema created by
//! [`migrate::run_migrations`](crate::migrate::run_migrations).

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use super::SessionStore;
use crate::db;
use crate::error::{TetherError, TetherResult};
use crate::migrate;
use crate::models::{
    from_millis, ChecklistItem, Message, Mode, NewChecklistItem, Role, Session, StoreStats,
};

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and run migrations.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn check_limit(limit: i64) -> TetherResult<()> {
    if limit < 1 {
        return Err(TetherError::validation(format!(
            "limit must be >= 1, got {}",
            limit
        )));
    }
    Ok(())
}

fn parse_metadata(raw: Option<String>) -> Value {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_else(|| Value::Object(Default::default()))
}

fn encode_metadata(metadata: Option<&Value>) -> Option<String> {
    metadata
        .filter(|m| !m.is_null() && m.as_object().map_or(true, |o| !o.is_empty()))
        .map(|m| m.to_string())
}

fn session_from_row(row: &SqliteRow) -> TetherResult<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
        metadata: parse_metadata(row.try_get("metadata")?),
        is_active: row.try_get::<i64, _>("is_active")? != 0,
    })
}

fn message_from_row(row: &SqliteRow) -> TetherResult<Message> {
    let role: String = row.try_get("message_type")?;
    let mode: String = row.try_get("mode")?;
    Ok(Message {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role: role.parse()?,
        content: row.try_get("content")?,
        mode: mode.parse()?,
        metadata: parse_metadata(row.try_get("metadata")?),
        created_at: from_millis(row.try_get("created_at")?),
    })
}

fn checklist_item_from_row(row: &SqliteRow) -> TetherResult<ChecklistItem> {
    Ok(ChecklistItem {
        id: row.try_get("id")?,
        task_text: row.try_get("task_text")?,
        is_completed: row.try_get::<i64, _>("is_completed")? != 0,
        position: row.try_get("position")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

const SESSION_COLUMNS: &str = "id, name, created_at, updated_at, metadata, is_active";
const MESSAGE_COLUMNS: &str = "id, session_id, message_type, content, mode, metadata, created_at";

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(
        &self,
        id: Option<&str>,
        name: Option<&str>,
        metadata: Option<&Value>,
    ) -> TetherResult<String> {
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(TetherError::validation("session id must not be empty"))
            }
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let now = now_millis();

        sqlx::query(
            r#"
            INSERT INTO sessions (id, name, created_at, updated_at, metadata, is_active)
            VALUES (?, ?, ?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                is_active = 1
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(now)
        .bind(now)
        .bind(encode_metadata(metadata))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn get_session(&self, id: &str) -> TetherResult<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sessions WHERE id = ? AND is_active = 1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list_sessions(&self, active_only: bool, limit: i64) -> TetherResult<Vec<Session>> {
        check_limit(limit)?;

        let filter = if active_only { "WHERE is_active = 1" } else { "" };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions {} ORDER BY updated_at DESC, created_at DESC, rowid DESC LIMIT ?",
            SESSION_COLUMNS, filter
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn rename_session(&self, id: &str, name: &str) -> TetherResult<()> {
        let result = sqlx::query(
            "UPDATE sessions SET name = ?, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(name)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(TetherError::not_found(format!("session {}", id)));
        }
        Ok(())
    }

    async fn deactivate_session(&self, id: &str) -> TetherResult<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE sessions SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(now_millis())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM sessions WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
            if !exists {
                return Err(TetherError::not_found(format!("session {}", id)));
            }
        }

        // Checklist rows follow their messages via ON DELETE CASCADE.
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> TetherResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(TetherError::not_found(format!("session {}", id)));
        }
        Ok(())
    }

    async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        metadata: Option<&Value>,
        mode: Option<Mode>,
    ) -> TetherResult<i64> {
        let role: Role = role.parse()?;
        let mode = mode.unwrap_or_default();
        let now = now_millis();

        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            return Err(TetherError::not_found(format!("session {}", session_id)));
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO messages (session_id, message_type, content, mode, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(mode.as_str())
        .bind(encode_metadata(metadata))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(inserted.last_insert_rowid())
    }

    async fn get_history(&self, session_id: &str, limit: i64) -> TetherResult<Vec<Message>> {
        check_limit(limit)?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE session_id = ? ORDER BY id ASC LIMIT ?",
            MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_recent_history(
        &self,
        session_id: &str,
        limit: i64,
    ) -> TetherResult<Vec<Message>> {
        check_limit(limit)?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {cols} FROM (
                SELECT {cols} FROM messages WHERE session_id = ? ORDER BY id DESC LIMIT ?
            ) ORDER BY id ASC
            "#,
            cols = MESSAGE_COLUMNS
        ))
        .bind(session_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn get_stats(&self) -> TetherResult<StoreStats> {
        let active_sessions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE is_active = 1")
                .fetch_one(&self.pool)
                .await?;
        let total_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;
        let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT message_type, COUNT(*) AS count FROM messages GROUP BY message_type",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut messages_by_role: BTreeMap<String, i64> = BTreeMap::new();
        for row in &rows {
            messages_by_role.insert(row.try_get("message_type")?, row.try_get("count")?);
        }

        Ok(StoreStats {
            active_sessions,
            total_sessions,
            total_messages,
            messages_by_role,
        })
    }

    async fn save_checklist(
        &self,
        session_id: &str,
        message_id: i64,
        items: &[NewChecklistItem],
    ) -> TetherResult<Vec<ChecklistItem>> {
        if let Some(pos) = items.iter().position(|i| i.task_text.trim().is_empty()) {
            return Err(TetherError::validation(format!(
                "checklist item {} has empty task_text",
                pos
            )));
        }

        let mut tx = self.pool.begin().await?;

        let owned: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM messages WHERE id = ? AND session_id = ?")
                .bind(message_id)
                .bind(session_id)
                .fetch_one(&mut *tx)
                .await?;
        if !owned {
            return Err(TetherError::not_found(format!(
                "message {} in session {}",
                message_id, session_id
            )));
        }

        sqlx::query("DELETE FROM checklist_items WHERE session_id = ? AND message_id = ?")
            .bind(session_id)
            .bind(message_id)
            .execute(&mut *tx)
            .await?;

        let now = now_millis();
        let mut saved = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let position = item.position.unwrap_or(index as i64);
            let result = sqlx::query(
                r#"
                INSERT INTO checklist_items
                    (session_id, message_id, task_text, is_completed, position, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(message_id)
            .bind(&item.task_text)
            .bind(item.is_completed)
            .bind(position)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            saved.push(ChecklistItem {
                id: result.last_insert_rowid(),
                task_text: item.task_text.clone(),
                is_completed: item.is_completed,
                position,
                created_at: from_millis(now),
                updated_at: from_millis(now),
            });
        }

        tx.commit().await?;

        saved.sort_by_key(|i| (i.position, i.id));
        Ok(saved)
    }

    async fn get_checklist(
        &self,
        session_id: &str,
        message_id: i64,
    ) -> TetherResult<Vec<ChecklistItem>> {
        let rows = sqlx::query(
            r#"
            SELECT id, task_text, is_completed, position, created_at, updated_at
            FROM checklist_items
            WHERE session_id = ? AND message_id = ?
            ORDER BY position ASC, id ASC
            "#,
        )
        .bind(session_id)
        .bind(message_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(checklist_item_from_row).collect()
    }

    async fn update_item_completion(&self, item_id: i64, completed: bool) -> TetherResult<bool> {
        let result =
            sqlx::query("UPDATE checklist_items SET is_completed = ?, updated_at = ? WHERE id = ?")
                .bind(completed)
                .bind(now_millis())
                .bind(item_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_checklist(&self, session_id: &str, message_id: i64) -> TetherResult<u64> {
        let result =
            sqlx::query("DELETE FROM checklist_items WHERE session_id = ? AND message_id = ?")
                .bind(session_id)
                .bind(message_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }
}
