//! Error types for the store.

use partshare_protocol::ProtocolError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Registration for a username that is already taken.
    #[error("user already exists: {0}")]
    AlreadyExists(String),

    /// Login for a username that was never registered.
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// Password did not match.
    #[error("invalid credentials for {0}")]
    InvalidCredential(String),

    /// Missing, expired, revoked or forged access token.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// Caller lacks the rights for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Partition does not exist.
    #[error("unknown partition: {0}")]
    PartitionNotFound(String),

    /// Encoding or addressing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal store error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Returns true if the caller is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidRequest(_)
                | StoreError::AlreadyExists(_)
                | StoreError::UnknownUser(_)
                | StoreError::InvalidCredential(_)
                | StoreError::NotAuthenticated(_)
                | StoreError::PermissionDenied(_)
                | StoreError::PartitionNotFound(_)
                | StoreError::Protocol(_)
        )
    }

    /// Returns true if the store is at fault.
    pub fn is_server_error(&self) -> bool {
        matches!(self, StoreError::Internal(_))
    }
}
