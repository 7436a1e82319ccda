//! Errors returned by the template service.

use crate::store::RepositoryError;
use thiserror::Error;

/// Failure of a service operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("This template already exists for this user. Please update or create another version")]
    DuplicateTemplate,

    #[error("This response [{0}] already exists for this user. Please update or create another version")]
    DuplicateResponseId(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// HTTP status a client should see for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::ValidationFailed(_)
            | ServiceError::DuplicateTemplate
            | ServiceError::DuplicateResponseId(_) => 400,
            ServiceError::NotFound(_) => 404,
            ServiceError::Repository(_) => 500,
        }
    }

    /// Messages safe to return to a client.
    pub fn messages(&self) -> Vec<String> {
        match self {
            ServiceError::ValidationFailed(errors) => errors.clone(),
            ServiceError::Repository(_) => vec!["Internal error".to_string()],
            other => vec![other.to_string()],
        }
    }
}
