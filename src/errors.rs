//! Error types for reqpulse
//!
//! The pipeline distinguishes failure kinds because the orchestrator treats
//! them differently: script errors are fatal during pre-request but recorded
//! during tests, and cancellation is reported distinctly from transport
//! failures. Assertion and test failures are data, not errors.

use thiserror::Error;

/// Main error type for reqpulse
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Script error: {0}")]
    Script(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Cancelled {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// True when the error came from observing the run's cancellation signal
    /// rather than from the work itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
