//! Error taxonomy for the conversation core.
//!
//! Library code returns [`TetherError`]; the binary and startup wiring use
//! `anyhow` on top of it. Every variant carries a human-readable message
//! that is safe to hand back to a client as-is.
//!
//! | Variant | Code | HTTP | Raised when |
//! |---------|------|------|-------------|
//! | [`Validation`](TetherError::Validation) | `validation` | 400 | missing/invalid field, unknown role or mode |
//! | [`NotFound`](TetherError::NotFound) | `not_found` | 404 | session, message or checklist item absent/inactive |
//! | [`Retrieval`](TetherError::Retrieval) | `retrieval` | 502 | the index call fails |
//! | [`Generation`](TetherError::Generation) | `generation` | 502 | model call fails or returns nothing usable |
//! | [`Persistence`](TetherError::Persistence) | `persistence` | 500 | the storage layer rejects a statement |

use thiserror::Error;

/// Result alias used throughout the core.
pub type TetherResult<T> = std::result::Result<T, TetherError>;

#[derive(Debug, Error)]
pub enum TetherError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl TetherError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval(message.into())
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::Retrieval(_) => "retrieval",
            Self::Generation(_) => "generation",
            Self::Persistence(_) => "persistence",
        }
    }
}
