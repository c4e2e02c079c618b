//! Error taxonomy for arena operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArenaError {
    /// A required credential or setting is missing.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An external call failed or timed out; retried on the next tick.
    #[error("fetch failed: {0}")]
    Fetch(String),
    /// The caller's request is malformed (e.g. no agents requested).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// A human selected an agent that cannot win.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl ArenaError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ArenaError::Configuration(_))
    }
}

pub type ArenaResult<T> = Result<T, ArenaError>;
