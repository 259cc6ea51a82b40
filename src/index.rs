//! Reference-material retrieval.
//!
//! The orchestrator only sees the [`RetrievalIndex`] trait. [`SqliteIndex`]
//! reads the SQLite file written by the offline indexer:
//!
//! ```text
//! documents(id, source, source_id, source_url, title, ...)
//! chunks(id, document_id, chunk_index, text, hash)
//! chunks_fts(chunk_id, document_id, text)      -- FTS5
//! chunk_vectors(chunk_id, document_id, embedding BLOB)
//! ```
//!
//! Keyword mode ranks with FTS5 BM25. Semantic mode embeds the query and
//! scores every stored vector by cosine similarity.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

use crate::config::{Config, EmbeddingConfig};
use crate::db;
use crate::embedding;
use crate::error::{TetherError, TetherResult};

/// A retrieved chunk of reference material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    pub content: String,
    pub metadata: Value,
}

#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Up to `k` passages, most relevant first.
    async fn similarity_search(&self, query: &str, k: usize) -> TetherResult<Vec<Passage>>;

    /// Number of searchable passages. An error means the index is unreadable.
    async fn health_check(&self) -> TetherResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
}

pub struct SqliteIndex {
    pool: SqlitePool,
    mode: SearchMode,
    embedding: EmbeddingConfig,
}

impl SqliteIndex {
    /// Open the index named in `config.index`, creating empty tables when the
    /// file is new.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.index.path).await?;
        ensure_schema(&pool).await?;
        let mode = match config.index.mode.as_str() {
            "semantic" => SearchMode::Semantic,
            _ => SearchMode::Keyword,
        };
        Ok(Self::new(pool, mode, config.embedding.clone()))
    }

    pub fn new(pool: SqlitePool, mode: SearchMode, embedding: EmbeddingConfig) -> Self {
        Self {
            pool,
            mode,
            embedding,
        }
    }

    async fn keyword_search(&self, query: &str, k: usize) -> TetherResult<Vec<Passage>> {
        let Some(fts_query) = to_fts_query(query) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(
            r#"
            SELECT c.text, c.chunk_index, d.source, d.source_id, d.title, d.source_url
            FROM chunks_fts f
            JOIN chunks c ON c.id = f.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE chunks_fts MATCH ?
            ORDER BY f.rank
            LIMIT ?
            "#,
        )
        .bind(&fts_query)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TetherError::retrieval(format!("keyword search failed: {}", e)))?;

        rows.iter().map(row_to_passage).collect()
    }

    async fn semantic_search(&self, query: &str, k: usize) -> TetherResult<Vec<Passage>> {
        let query_vec = embedding::embed_query(&self.embedding, query)
            .await
            .map_err(|e| TetherError::retrieval(format!("query embedding failed: {}", e)))?;
        self.search_by_vector(&query_vec, k).await
    }

    /// Score every stored vector against `query_vec` and keep the best `k`.
    ///
    /// The query and every stored vector must have `embedding.dims`
    /// components (or the query's length when no dims are configured).
    pub async fn search_by_vector(&self, query_vec: &[f32], k: usize) -> TetherResult<Vec<Passage>> {
        let dims = self.embedding.dims.unwrap_or(query_vec.len());
        if query_vec.len() != dims {
            return Err(TetherError::retrieval(format!(
                "query embedding has {} dims, index expects {}",
                query_vec.len(),
                dims
            )));
        }

        let rows = sqlx::query(
            r#"
            SELECT cv.embedding, c.text, c.chunk_index,
                   d.source, d.source_id, d.title, d.source_url
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = c.document_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TetherError::retrieval(format!("vector scan failed: {}", e)))?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row
                .try_get("embedding")
                .map_err(|e| TetherError::retrieval(e.to_string()))?;
            candidates.push((embedding::blob_to_vec(&blob), row_to_passage(row)?));
        }

        rank(query_vec, candidates, k)
    }
}

/// Order candidates by cosine similarity to `query_vec`, best first, and
/// keep `k`. A stored vector of a different length is an error.
fn rank(
    query_vec: &[f32],
    candidates: Vec<(Vec<f32>, Passage)>,
    k: usize,
) -> TetherResult<Vec<Passage>> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (vec, passage) in candidates {
        if vec.len() != query_vec.len() {
            return Err(TetherError::retrieval(format!(
                "stored vector has {} dims, query has {}",
                vec.len(),
                query_vec.len()
            )));
        }
        scored.push((embedding::cosine_similarity(query_vec, &vec), passage));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().take(k).map(|(_, p)| p).collect())
}

#[async_trait]
impl RetrievalIndex for SqliteIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> TetherResult<Vec<Passage>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let passages = match self.mode {
            SearchMode::Keyword => self.keyword_search(query, k).await?,
            SearchMode::Semantic => self.semantic_search(query, k).await?,
        };
        tracing::debug!(query, k, found = passages.len(), "index search");
        Ok(passages)
    }

    async fn health_check(&self) -> TetherResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| TetherError::retrieval(format!("index unreadable: {}", e)))?;
        Ok(count.max(0) as u64)
    }
}

fn row_to_passage(row: &sqlx::sqlite::SqliteRow) -> TetherResult<Passage> {
    let get_text = |col: &str| -> TetherResult<Option<String>> {
        row.try_get(col)
            .map_err(|e| TetherError::retrieval(e.to_string()))
    };
    let content = get_text("text")?.unwrap_or_default();
    let chunk_index: i64 = row
        .try_get("chunk_index")
        .map_err(|e| TetherError::retrieval(e.to_string()))?;

    Ok(Passage {
        content,
        metadata: json!({
            "source": get_text("source")?,
            "source_id": get_text("source_id")?,
            "title": get_text("title")?,
            "source_url": get_text("source_url")?,
            "chunk_index": chunk_index,
        }),
    })
}

/// Reduce free text to an FTS5 expression of OR-ed quoted terms.
///
/// Raw user text can contain FTS5 operators and punctuation that fail to
/// parse, so only alphanumeric runs survive.
fn to_fts_query(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Create the indexer's tables if they are missing.
pub async fn ensure_schema(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_url TEXT,
            title TEXT,
            updated_at INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL DEFAULT '',
            UNIQUE(source, source_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL DEFAULT '',
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)")
        .execute(pool)
        .await?;

    Ok(())
}
