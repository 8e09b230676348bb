//! Unified error types for the punishment engine
use crate::punishment::Punishment;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum BansError {
    /// An exclusive punishment of the same type is already active for the subject
    #[error("Conflicting punishment: {0}")]
    ConflictingPunishment(Box<Punishment>),

    /// A statement failed against the backing store
    #[error("Storage error in `{statement}`: {source}")]
    Storage {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    /// Identity or punishment lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed subject string or punishment
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BansError {
    /// Wrap a driver error together with the statement that produced it
    pub fn storage(statement: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Storage {
            statement: statement.into(),
            source,
        }
    }

    /// The conflicting punishment, if this is a conflict error
    pub fn conflicting(&self) -> Option<&Punishment> {
        match self {
            Self::ConflictingPunishment(existing) => Some(existing.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type BansResult<T> = Result<T, BansError>;
