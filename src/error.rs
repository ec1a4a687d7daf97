//! Error types for DeepStudy

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while tracking, scoring, storing, or syncing sessions
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("A session is already active: {0}")]
    SessionAlreadyActive(Uuid),

    #[error("No active session")]
    NoActiveSession,

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt session store: {0}")]
    CorruptStore(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Sync transport error: {0}")]
    TransportError(String),

    #[error("Engine task has stopped")]
    EngineStopped,
}

impl EngineError {
    /// Whether the error was caused by the caller's input rather than by the engine.
    ///
    /// The sync ingest path answers these with a client error instead of a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::ParseError(_) | EngineError::JsonError(_) | EngineError::MissingField(_)
        )
    }
}
