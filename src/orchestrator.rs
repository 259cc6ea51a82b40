//! Conversation turns.
//!
//! A turn runs through three explicit steps:
//!
//! ```text
//!   Decide ──Text──────────────────────────────► answer
//!     │
//!     └─ToolRequest──► Retrieve ──► Generate ──► answer
//! ```
//!
//! - **Decide**: replayed history plus a system prompt carrying the mode and
//!   the activity summary. The model may answer directly or ask for the
//!   `retrieve` tool.
//! - **Retrieve**: each `retrieve` call runs a `k = 2` similarity search;
//!   results are fed back as tool-result messages.
//! - **Generate**: a fresh system prompt carrying the retrieved passages, and
//!   the conversation without tool plumbing. No tools are bound.
//!
//! The user message is persisted before any model call. If a later step
//! fails, the session keeps a user message without an answer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::activity::{summarize_activity_local, ActivityEvent};
use crate::config::Config;
use crate::error::{TetherError, TetherResult};
use crate::index::{Passage, RetrievalIndex, SqliteIndex};
use crate::llm::{
    retrieve_tool, ChatMessage, ChatModel, ModelReply, OpenAiChatModel, ToolCall, RETRIEVE_TOOL,
};
use crate::models::{DetectiveMode, Message, Mode, Role};
use crate::prompt::{compose_system_prompt, parse_task_lines, title_prompt, PromptContext};
use crate::store::{SessionStore, SqliteSessionStore};

/// Passages fetched per `retrieve` call.
pub const RETRIEVAL_K: usize = 2;

pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

const MAX_TITLE_CHARS: usize = 50;
const PLACEHOLDER_NAMES: [&str; 3] = ["", "New Chat", "New Conversation"];

/// One inbound turn.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TurnRequest {
    pub message: String,
    pub session_id: String,
    #[serde(default)]
    pub activity_context: Vec<ActivityEvent>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub detective_mode: DetectiveMode,
}

impl TurnRequest {
    pub fn new(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub response: String,
    pub session_id: String,
    /// Id of the persisted assistant message.
    pub message_id: i64,
    /// Task lines of a planner answer; empty in other modes.
    pub tasks: Vec<String>,
}

/// Boundary payload: `{success: true, ...}` or `{success: false, error, ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl TurnResponse {
    pub fn failure(session_id: impl Into<String>, err: &TetherError) -> Self {
        Self {
            success: false,
            response: None,
            session_id: session_id.into(),
            message_id: None,
            tasks: Vec::new(),
            error: Some(err.to_string()),
            code: Some(err.code()),
        }
    }
}

impl From<TurnOutcome> for TurnResponse {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            success: true,
            response: Some(outcome.response),
            session_id: outcome.session_id,
            message_id: Some(outcome.message_id),
            tasks: outcome.tasks,
            error: None,
            code: None,
        }
    }
}

/// Runs turns against shared, read-only collaborators.
///
/// Turns for different sessions may run concurrently. Callers serialize
/// turns within one session.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    index: Arc<dyn RetrievalIndex>,
    model: Arc<dyn ChatModel>,
    history_limit: i64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        index: Arc<dyn RetrievalIndex>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            index,
            model,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    /// Wire the SQLite store, the SQLite index and the chat-completions
    /// client described by `config`.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = SqliteSessionStore::open(&config.db.path).await?;
        let index = SqliteIndex::open(config).await?;
        let model = OpenAiChatModel::new(&config.llm)?;
        Ok(Self::new(Arc::new(store), Arc::new(index), Arc::new(model))
            .with_history_limit(config.conversation.history_limit))
    }

    /// Number of most recent messages replayed into each turn.
    pub fn with_history_limit(mut self, limit: i64) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn index(&self) -> &Arc<dyn RetrievalIndex> {
        &self.index
    }

    /// Run a turn and fold any error into the boundary payload.
    pub async fn generate_response(&self, request: &TurnRequest) -> TurnResponse {
        match self.process_turn(request).await {
            Ok(outcome) => outcome.into(),
            Err(e) => {
                tracing::error!(session_id = %request.session_id, error = %e, "turn failed");
                TurnResponse::failure(request.session_id.clone(), &e)
            }
        }
    }

    pub async fn process_turn(&self, request: &TurnRequest) -> TetherResult<TurnOutcome> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(TetherError::validation("message is required"));
        }
        let session_id = request.session_id.trim();
        if session_id.is_empty() {
            return Err(TetherError::validation("session_id is required"));
        }
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| TetherError::not_found(format!("session {}", session_id)))?;

        tracing::info!(session_id, mode = %request.mode, "processing turn");

        let history = self
            .store
            .get_recent_history(session_id, self.history_limit)
            .await?;
        // A failed first turn leaves a user row behind, so only a stored
        // answer marks the session as already started.
        let untitled = needs_title(session.name.as_deref())
            && !history.iter().any(|m| m.role == Role::Assistant);

        let mut messages: Vec<ChatMessage> = history.iter().filter_map(replay).collect();
        messages.push(ChatMessage::user(message));

        self.store
            .append_message(session_id, Role::User.as_str(), message, None, Some(request.mode))
            .await?;

        let activity = summarize_activity_local(&request.activity_context);

        let answer = match self.decide(&messages, request, &activity).await? {
            ModelReply::Text(text) => {
                tracing::debug!(session_id, "decide: answered directly");
                text
            }
            ModelReply::ToolRequest { content, calls } => {
                tracing::debug!(session_id, calls = calls.len(), "decide: retrieval requested");
                let results = self.retrieve(&calls).await?;
                messages.push(ChatMessage::assistant_tool_request(content, calls));
                messages.extend(results);
                self.generate(&messages, request).await?
            }
        };

        if answer.trim().is_empty() {
            return Err(TetherError::generation("model returned an empty answer"));
        }

        let message_id = self
            .store
            .append_message(
                session_id,
                Role::Assistant.as_str(),
                &answer,
                None,
                Some(request.mode),
            )
            .await?;

        if untitled {
            self.name_session(session_id, message).await;
        }

        let tasks = if request.mode == Mode::Planner {
            parse_task_lines(&answer)
        } else {
            Vec::new()
        };

        Ok(TurnOutcome {
            response: answer,
            session_id: session_id.to_string(),
            message_id,
            tasks,
        })
    }

    async fn decide(
        &self,
        messages: &[ChatMessage],
        request: &TurnRequest,
        activity: &str,
    ) -> TetherResult<ModelReply> {
        let prompt = compose_system_prompt(&PromptContext {
            mode: request.mode,
            detective_mode: request.detective_mode,
            retrieved: None,
            activity: Some(activity),
        });
        let prompted = with_system_prompt(messages, prompt);
        self.model.complete(&prompted, &[retrieve_tool()]).await
    }

    async fn retrieve(&self, calls: &[ToolCall]) -> TetherResult<Vec<ChatMessage>> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            if call.name != RETRIEVE_TOOL {
                return Err(TetherError::generation(format!(
                    "model requested unknown tool '{}'",
                    call.name
                )));
            }
            let query = call
                .arguments
                .get("query")
                .and_then(|q| q.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .ok_or_else(|| {
                    TetherError::generation("retrieve call is missing a 'query' string")
                })?;

            let passages = self.index.similarity_search(query, RETRIEVAL_K).await?;
            tracing::debug!(query, found = passages.len(), "retrieve");
            results.push(ChatMessage::tool_result(
                call.id.clone(),
                serialize_passages(&passages),
            ));
        }
        Ok(results)
    }

    async fn generate(&self, messages: &[ChatMessage], request: &TurnRequest) -> TetherResult<String> {
        let retrieved = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = compose_system_prompt(&PromptContext {
            mode: request.mode,
            detective_mode: request.detective_mode,
            retrieved: Some(&retrieved),
            activity: None,
        });

        let mut conversation = vec![ChatMessage::system(prompt)];
        conversation.extend(
            messages
                .iter()
                .filter(|m| match m.role {
                    Role::User => true,
                    Role::Assistant => !m.is_tool_request(),
                    Role::System | Role::Tool => false,
                })
                .cloned(),
        );

        match self.model.complete(&conversation, &[]).await? {
            ModelReply::Text(text) if !text.trim().is_empty() => {
                tracing::debug!("generate: answered with retrieved context");
                Ok(text)
            }
            ModelReply::Text(_) => Err(TetherError::generation(
                "model returned an empty answer after retrieval",
            )),
            ModelReply::ToolRequest { .. } => Err(TetherError::generation(
                "model requested a tool during generation",
            )),
        }
    }

    async fn name_session(&self, session_id: &str, first_message: &str) {
        let request = [ChatMessage::user(title_prompt(first_message))];
        let title = match self.model.complete(&request, &[]).await {
            Ok(ModelReply::Text(text)) if !clean_title(&text).is_empty() => clean_title(&text),
            Ok(_) => {
                tracing::warn!(session_id, "title model returned no text, using first message");
                truncate_title(first_message.trim())
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "title generation failed, using first message");
                truncate_title(first_message.trim())
            }
        };

        if let Err(e) = self.store.rename_session(session_id, &title).await {
            tracing::warn!(session_id, error = %e, "failed to store session title");
        }
    }
}

/// Stored messages that can be replayed to the model.
///
/// Tool results and tool-request turns are not replayed: the call ids that
/// pair them are not stored with the rows.
fn replay(message: &Message) -> Option<ChatMessage> {
    match message.role {
        Role::User => Some(ChatMessage::user(message.content.clone())),
        Role::Assistant if !message.is_tool_request() => {
            Some(ChatMessage::assistant(message.content.clone()))
        }
        Role::System => Some(ChatMessage::system(message.content.clone())),
        Role::Assistant | Role::Tool => None,
    }
}

/// Put `prompt` in place of the first system message and drop any others,
/// or prepend it when there is none.
fn with_system_prompt(messages: &[ChatMessage], prompt: String) -> Vec<ChatMessage> {
    let mut prompt = Some(prompt);
    let mut out = Vec::with_capacity(messages.len() + 1);
    for m in messages {
        if m.role != Role::System {
            out.push(m.clone());
        } else if let Some(p) = prompt.take() {
            out.push(ChatMessage::system(p));
        }
    }
    if let Some(p) = prompt {
        out.insert(0, ChatMessage::system(p));
    }
    out
}

fn serialize_passages(passages: &[Passage]) -> String {
    passages
        .iter()
        .map(|p| format!("Source: {}\nContent: {}", p.metadata, p.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn needs_title(name: Option<&str>) -> bool {
    match name {
        None => true,
        Some(name) => PLACEHOLDER_NAMES.contains(&name.trim()),
    }
}

fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace());
    truncate_title(trimmed)
}

fn truncate_title(text: &str) -> String {
    if text.chars().count() <= MAX_TITLE_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(MAX_TITLE_CHARS - 3).collect();
    format!("{}...", head)
}
