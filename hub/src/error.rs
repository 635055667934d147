//! Hub error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HubError>;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Not found: {0}")]
    NotFound(String),
}
