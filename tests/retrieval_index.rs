//! SQLite retrieval index against a seeded temp database.

use tempfile::TempDir;

use tether::config::{parse_config, EmbeddingConfig};
use tether::db;
use tether::embedding::vec_to_blob;
use tether::index::{ensure_schema, RetrievalIndex, SearchMode, SqliteIndex};

async fn seeded(mode: SearchMode) -> (TempDir, SqliteIndex) {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
    ensure_schema(&pool).await.unwrap();

    let docs = [
        ("d1", "adhd-guide.pdf", "ADHD Guide", "https://example.org/guide"),
        ("d2", "notes.md", "Notes", ""),
    ];
    for (id, source_id, title, url) in docs {
        sqlx::query(
            "INSERT INTO documents (id, source, source_id, source_url, title) VALUES (?, 'filesystem', ?, NULLIF(?, ''), ?)",
        )
        .bind(id)
        .bind(source_id)
        .bind(url)
        .bind(title)
        .execute(&pool)
        .await
        .unwrap();
    }

    let chunks = [
        ("c1", "d1", 0, "Body doubling means working next to another person to stay focused."),
        ("c2", "d1", 1, "Break big tasks into tiny steps and set a five minute timer."),
        ("c3", "d2", 0, "Groceries: eggs, milk, coffee."),
    ];
    for (id, doc, idx, text) in chunks {
        sqlx::query("INSERT INTO chunks (id, document_id, chunk_index, text) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(doc)
            .bind(idx)
            .bind(text)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(id)
            .bind(doc)
            .bind(text)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO chunk_vectors (chunk_id, document_id, embedding) VALUES (?, ?, ?)")
            .bind(id)
            .bind(doc)
            .bind(vec_to_blob(&[1.0, 0.0, idx as f32]))
            .execute(&pool)
            .await
            .unwrap();
    }

    (tmp, SqliteIndex::new(pool, mode, EmbeddingConfig::default()))
}

#[tokio::test]
async fn keyword_search_returns_matching_passages_with_metadata() {
    let (_tmp, index) = seeded(SearchMode::Keyword).await;

    let passages = index.similarity_search("body doubling", 2).await.unwrap();
    assert_eq!(passages.len(), 1);
    let p = &passages[0];
    assert!(p.content.starts_with("Body doubling"));
    assert_eq!(p.metadata["source"], "filesystem");
    assert_eq!(p.metadata["source_id"], "adhd-guide.pdf");
    assert_eq!(p.metadata["title"], "ADHD Guide");
    assert_eq!(p.metadata["source_url"], "https://example.org/guide");
    assert_eq!(p.metadata["chunk_index"], 0);
}

#[tokio::test]
async fn keyword_search_respects_k_and_tolerates_operators() {
    let (_tmp, index) = seeded(SearchMode::Keyword).await;

    let passages = index
        .similarity_search("timer OR \"focused\" AND (milk*", 2)
        .await
        .unwrap();
    assert_eq!(passages.len(), 2);

    let passages = index.similarity_search("timer focused milk", 5).await.unwrap();
    assert_eq!(passages.len(), 3);
}

#[tokio::test]
async fn empty_queries_and_zero_k_return_nothing() {
    let (_tmp, index) = seeded(SearchMode::Keyword).await;

    assert!(index.similarity_search("   ", 2).await.unwrap().is_empty());
    assert!(index.similarity_search("?!", 2).await.unwrap().is_empty());
    assert!(index.similarity_search("timer", 0).await.unwrap().is_empty());
    assert!(index.similarity_search("zebra", 2).await.unwrap().is_empty());
}

#[tokio::test]
async fn health_check_counts_passages() {
    let (_tmp, index) = seeded(SearchMode::Keyword).await;
    assert_eq!(index.health_check().await.unwrap(), 3);
}

#[tokio::test]
async fn semantic_search_without_embedder_is_a_retrieval_error() {
    let (_tmp, index) = seeded(SearchMode::Semantic).await;

    let err = index.similarity_search("focus", 2).await.unwrap_err();
    assert_eq!(err.code(), "retrieval");
}

#[tokio::test]
async fn vector_search_ranks_stored_vectors() {
    let (_tmp, index) = seeded(SearchMode::Semantic).await;

    // Stored vectors are [1, 0, chunk_index]; only c2 has a third component.
    let best = index.search_by_vector(&[0.0, 0.0, 1.0], 1).await.unwrap();
    assert_eq!(best.len(), 1);
    assert!(best[0].content.starts_with("Break big tasks"));

    let all = index.search_by_vector(&[1.0, 0.0, 0.0], 5).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all[2].content.starts_with("Break big tasks"));

    let two = index.search_by_vector(&[1.0, 0.0, 0.0], 2).await.unwrap();
    assert_eq!(two.len(), 2);
    assert!(two.iter().all(|p| !p.content.starts_with("Break big tasks")));
}

#[tokio::test]
async fn vector_search_rejects_dimension_mismatch() {
    let (tmp, index) = seeded(SearchMode::Semantic).await;

    // Stored vectors have 3 components.
    let err = index.search_by_vector(&[1.0, 0.0], 2).await.unwrap_err();
    assert_eq!(err.code(), "retrieval");

    // Configured dims disagree with the query embedding.
    drop(index);
    let pool = db::connect(&tmp.path().join("index.sqlite")).await.unwrap();
    let config = EmbeddingConfig {
        dims: Some(4),
        ..EmbeddingConfig::default()
    };
    let index = SqliteIndex::new(pool, SearchMode::Semantic, config);
    let err = index.search_by_vector(&[1.0, 0.0, 0.0], 2).await.unwrap_err();
    assert_eq!(err.code(), "retrieval");
    assert!(err.to_string().contains("expects 4"));
}

#[tokio::test]
async fn open_creates_an_empty_index() {
    let tmp = TempDir::new().unwrap();
    let toml = format!(
        r#"
[db]
path = "{root}/data/tether.sqlite"

[index]
path = "{root}/data/index.sqlite"

[llm]
model = "gpt-4o-mini"

[server]
bind = "127.0.0.1:0"
"#,
        root = tmp.path().display()
    );
    let config = parse_config(&toml).unwrap();

    let index = SqliteIndex::open(&config).await.unwrap();
    assert_eq!(index.health_check().await.unwrap(), 0);
    assert!(index.similarity_search("anything", 2).await.unwrap().is_empty());

    // Reopening an existing file keeps the schema.
    drop(index);
    let index = SqliteIndex::open(&config).await.unwrap();
    assert_eq!(index.health_check().await.unwrap(), 0);
}
