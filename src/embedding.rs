//! Query embedding for semantic retrieval.
//!
//! Only the query side lives here: passages were embedded offline when the
//! index was built, and [`SqliteIndex`](crate::index::SqliteIndex) compares
//! the query vector against the stored ones.
//!
//! | Config Value | Endpoint |
//! |-------------|----------|
//! | `"openai"` | `POST https://api.openai.com/v1/embeddings` (needs `OPENAI_API_KEY`) |
//! | `"ollama"` | `POST {url}/api/embed` (default `http://localhost:11434`) |
//! | `"disabled"` | always errors |

use anyhow::{bail, Result};

use crate::config::EmbeddingConfig;
use crate::http::{build_client, post_json_with_retry};

/// Embed a single query text with the configured provider.
pub async fn embed_query(config: &EmbeddingConfig, text: &str) -> Result<Vec<f32>> {
    let model = match (&config.provider[..], &config.model) {
        ("disabled", _) => bail!("Embedding provider is disabled"),
        (_, Some(model)) => model,
        (_, None) => bail!("embedding.model required"),
    };
    let client = build_client(config.timeout_secs)?;
    let body = serde_json::json!({ "model": model, "input": [text] });

    let mut vectors = match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
            let json = post_json_with_retry(
                &client,
                "https://api.openai.com/v1/embeddings",
                Some(&api_key),
                &body,
                config.max_retries,
                "OpenAI API",
            )
            .await?;
            parse_openai_response(&json)?
        }
        "ollama" => {
            let url = config.url.as_deref().unwrap_or("http://localhost:11434");
            let json = post_json_with_retry(
                &client,
                &format!("{}/api/embed", url),
                None,
                &body,
                config.max_retries,
                "Ollama API",
            )
            .await?;
            parse_ollama_response(&json)?
        }
        other => bail!("Unknown embedding provider: {}", other),
    };

    if vectors.is_empty() {
        bail!("Empty embedding response");
    }
    Ok(vectors.swap_remove(0))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    data.iter()
        .map(|item| {
            item.get("embedding")
                .and_then(|e| e.as_array())
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))
        })
        .collect()
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| {
                    anyhow::anyhow!("Invalid Ollama response: embedding is not an array")
                })
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

/// Decode a little-endian `f32` BLOB as written by the indexer.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Encode a vector as a little-endian `f32` BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
