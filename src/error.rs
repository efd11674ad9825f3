use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("Model access is not configured: {0}")]
    Configuration(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model request failed: {0}")]
    Transport(String),

    #[error("Failed to parse AI JSON response: {0}")]
    Parse(String),

    #[error("Invalid JSON structure: {0}")]
    Shape(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PilotError {
    /// Whether another attempt at the same model call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PilotError::Timeout(_)
                | PilotError::Transport(_)
                | PilotError::Parse(_)
                | PilotError::Shape(_)
        )
    }
}

impl From<reqwest::Error> for PilotError {
    fn from(err: reqwest::Error) -> Self {
        PilotError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PilotError>;
