use serde::Serialize;
use thiserror::Error;

use crate::{ClientError, DatabaseError, RemoteError};

pub type CollabResult<T> = Result<T, CollabError>;

#[derive(Debug, Error)]
pub enum CollabError {
    /// The user has no usable credential for the music service
    #[error("Not authenticated with the music service")]
    Unauthenticated,
    #[error("The session is closed")]
    SessionClosed,
    #[error("The session does not exist")]
    SessionNotFound,
    #[error("That song is already in the queue")]
    DuplicateInQueue,
    /// Only the owner of a session may do this
    #[error("Only the owner of the session may do this")]
    Forbidden,
    #[error("The music service failed: {0}")]
    RemoteServiceFailure(#[from] RemoteError),
    #[error("The database failed: {0}")]
    PersistenceFailure(#[from] DatabaseError),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// What the outside world gets to see of an error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

impl CollabError {
    /// A stable, machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::SessionClosed => "session_closed",
            Self::SessionNotFound => "session_not_found",
            Self::DuplicateInQueue => "duplicate_in_queue",
            Self::Forbidden => "forbidden",
            Self::RemoteServiceFailure(_) => "remote_service_failure",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// The HTTP status an HTTP layer should respond with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::SessionClosed => 410,
            Self::SessionNotFound => 404,
            Self::DuplicateInQueue => 409,
            Self::Forbidden => 403,
            Self::RemoteServiceFailure(_) => 502,
            Self::PersistenceFailure(_) => 503,
            Self::InvalidInput(_) => 400,
        }
    }

    /// Converts the error into a response body without leaking internals
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::RemoteServiceFailure(_) => "The music service could not be reached".to_string(),
            Self::PersistenceFailure(_) => "The database is unavailable".to_string(),
            e => e.to_string(),
        };

        ErrorResponse {
            code: self.code(),
            message,
        }
    }
}

impl From<ClientError> for CollabError {
    fn from(value: ClientError) -> Self {
        match value {
            ClientError::NoCredential(_) | ClientError::Revoked(_) => Self::Unauthenticated,
            ClientError::Refresh(e) => Self::RemoteServiceFailure(e),
            ClientError::Db(e) => Self::PersistenceFailure(e),
        }
    }
}
