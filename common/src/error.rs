use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Encoder unavailable: {0}")]
    EncoderUnavailable(String),
    #[error("Index timeout: {0}")]
    IndexTimeout(String),
    #[error("Validator unavailable: {0}")]
    ValidatorUnavailable(String),
    #[error("Invalid similarity score: {0}")]
    InvalidScore(f32),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
