use thiserror::Error;

use crate::model::ValidationErrors;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt node at {0}")]
    Corrupt(String),
}

impl TreeError {
    pub fn invalid_path(path: &str, reason: impl Into<String>) -> Self {
        TreeError::InvalidPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BookError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Book not found")]
    NotFound,

    #[error("store error")]
    Store(#[from] TreeError),
}

impl From<ValidationErrors> for BookError {
    fn from(errors: ValidationErrors) -> Self {
        BookError::Validation(errors)
    }
}
