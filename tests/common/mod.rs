//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use tether::error::{TetherError, TetherResult};
use tether::index::{Passage, RetrievalIndex};
use tether::llm::{ChatMessage, ChatModel, ModelReply, ToolCall, ToolSpec};
use tether::orchestrator::Orchestrator;
use tether::store::SqliteSessionStore;

/// One recorded `complete` call.
#[derive(Debug, Clone)]
pub struct ModelCall {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
}

/// Replays queued replies in order and records every call.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<TetherResult<ModelReply>>>,
    calls: Mutex<Vec<ModelCall>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<TetherResult<ModelReply>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<ModelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push(&self, reply: TetherResult<ModelReply>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSpec],
    ) -> TetherResult<ModelReply> {
        self.calls.lock().unwrap().push(ModelCall {
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TetherError::generation("script exhausted")))
    }
}

/// Returns canned passages and records queries.
#[derive(Default)]
pub struct FakeIndex {
    pub passages: Vec<Passage>,
    pub fail: bool,
    queries: Mutex<Vec<(String, usize)>>,
}

impl FakeIndex {
    pub fn with_passages(contents: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            passages: contents
                .iter()
                .enumerate()
                .map(|(i, c)| Passage {
                    content: c.to_string(),
                    metadata: json!({"source": "guide.pdf", "chunk_index": i}),
                })
                .collect(),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn queries(&self) -> Vec<(String, usize)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RetrievalIndex for FakeIndex {
    async fn similarity_search(&self, query: &str, k: usize) -> TetherResult<Vec<Passage>> {
        self.queries.lock().unwrap().push((query.to_string(), k));
        if self.fail {
            return Err(TetherError::retrieval("index offline"));
        }
        Ok(self.passages.iter().take(k).cloned().collect())
    }

    async fn health_check(&self) -> TetherResult<u64> {
        if self.fail {
            return Err(TetherError::retrieval("index offline"));
        }
        Ok(self.passages.len() as u64)
    }
}

pub fn text(s: &str) -> TetherResult<ModelReply> {
    Ok(ModelReply::Text(s.to_string()))
}

pub fn retrieve_request(query: &str) -> TetherResult<ModelReply> {
    Ok(ModelReply::ToolRequest {
        content: String::new(),
        calls: vec![ToolCall {
            id: "call_1".to_string(),
            name: "retrieve".to_string(),
            arguments: json!({ "query": query }),
        }],
    })
}

pub async fn temp_store() -> (TempDir, Arc<SqliteSessionStore>) {
    let tmp = TempDir::new().unwrap();
    let store = SqliteSessionStore::open(&tmp.path().join("data/tether.sqlite"))
        .await
        .unwrap();
    (tmp, Arc::new(store))
}

pub fn orchestrator(
    store: Arc<SqliteSessionStore>,
    index: Arc<FakeIndex>,
    model: Arc<ScriptedModel>,
) -> Orchestrator {
    Orchestrator::new(store, index, model)
}
