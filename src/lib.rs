//! # Tether
//!
//! An ADHD-focused assistant backend. Each turn replays the stored
//! conversation, lets the model decide whether it needs reference material,
//! retrieves passages when it does, and stores the answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐
//! │  HTTP /  │──▶│ Orchestrator │──▶│  ChatModel   │
//! │   CLI    │   │ decide/retr/ │   │ (OpenAI API) │
//! └──────────┘   │   generate   │   └──────────────┘
//!                └──┬────────┬──┘
//!                   │        │
//!                   ▼        ▼
//!          ┌─────────────┐ ┌──────────────┐
//!          │SessionStore │ │RetrievalIndex│
//!          │  (SQLite)   │ │ (SQLite FTS5 │
//!          └─────────────┘ │  + vectors)  │
//!                          └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Sessions, messages, checklist items, roles and modes |
//! | [`error`] | Error taxonomy |
//! | [`store`] | Conversation persistence |
//! | [`index`] | Reference passage retrieval |
//! | [`embedding`] | Query embeddings for semantic retrieval |
//! | [`activity`] | Activity log digests |
//! | [`prompt`] | System prompts per mode |
//! | [`llm`] | Chat model client |
//! | [`orchestrator`] | The decide/retrieve/generate turn |
//! | [`server`] | HTTP API |
//! | [`chat`] | Terminal commands |
//! | [`stats`] | Store statistics |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod activity;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
mod http;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod server;
pub mod stats;
pub mod store;
