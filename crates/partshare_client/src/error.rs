//! Error types for the share client.

use crate::handshake::HandshakeState;
use partshare_protocol::{ProtocolError, StatusCode};
use partshare_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for transport calls.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for local user-store operations.
pub type UserStoreResult<T> = Result<T, UserStoreError>;

/// Errors raised between the client and the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store answered with an error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransportError {
    /// Returns true if the request may be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unreachable(_) => true,
            TransportError::Store(e) => e.is_server_error(),
        }
    }
}

/// Errors from the local user store.
#[derive(Error, Debug)]
pub enum UserStoreError {
    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The user file is not valid JSON.
    #[error("invalid user file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Authentication failures.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Registration of a username that is already taken.
    #[error("user already exists: {0}")]
    AlreadyExists(String),

    /// Login with an unknown username.
    #[error("user not found: {0}")]
    NotFound(String),

    /// Login with a wrong password.
    #[error("invalid credential for {0}")]
    InvalidCredential(String),

    /// The store stayed unreachable after every retry.
    #[error("store unreachable after {attempts} attempt(s): {message}")]
    ServerUnreachable {
        /// Number of attempts made.
        attempts: u32,
        /// Last transport error.
        message: String,
    },

    /// Another session is still current on this client.
    #[error("session for {0} is still active")]
    SessionActive(String),

    /// The local user record could not be written.
    #[error("local user store: {0}")]
    Storage(#[from] UserStoreError),

    /// Any other store failure.
    #[error("authentication failed: {0}")]
    Other(String),
}

impl AuthError {
    pub(crate) fn from_transport(error: TransportError, attempts: u32) -> Self {
        match error {
            TransportError::Unreachable(message) => AuthError::ServerUnreachable { attempts, message },
            TransportError::Store(StoreError::AlreadyExists(name)) => AuthError::AlreadyExists(name),
            TransportError::Store(StoreError::UnknownUser(name)) => AuthError::NotFound(name),
            TransportError::Store(StoreError::InvalidCredential(name)) => {
                AuthError::InvalidCredential(name)
            }
            TransportError::Store(other) => AuthError::Other(other.to_string()),
        }
    }
}

/// Logout failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogoutError {
    /// The logout was not acknowledged.
    #[error("logout not acknowledged: {0}")]
    Unreachable(String),
}

/// Errors while watching a management record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    /// No terminal state within the timeout.
    #[error("no terminal state within {0:?}")]
    TimedOut(Duration),

    /// The watch was cancelled or its subscription closed.
    #[error("watch cancelled")]
    Cancelled,

    /// A snapshot failed to decode.
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

/// Share-offer failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OfferError {
    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The store refused the offer.
    #[error("offer rejected: {0}")]
    Rejected(String),

    /// The offer was not well formed.
    #[error("malformed offer: {0}")]
    Malformed(String),

    /// The session is no longer valid.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// No terminal state within the watch timeout.
    #[error("offer not processed within {0:?}")]
    TimedOut(Duration),

    /// The offer watch was cancelled.
    #[error("offer watch cancelled")]
    Cancelled,

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

impl OfferError {
    pub(crate) fn from_status(code: Option<StatusCode>, message: String) -> Self {
        match code {
            Some(StatusCode::Malformed) => OfferError::Malformed(message),
            Some(code) => OfferError::Rejected(format!("{code}: {message}")),
            None => OfferError::Rejected(message),
        }
    }
}

impl From<TransportError> for OfferError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unreachable(message) => OfferError::Unreachable(message),
            TransportError::Store(StoreError::NotAuthenticated(message)) => {
                OfferError::NotAuthenticated(message)
            }
            TransportError::Store(StoreError::Protocol(e)) => OfferError::Codec(e),
            TransportError::Store(StoreError::InvalidRequest(message)) => {
                OfferError::Malformed(message)
            }
            TransportError::Store(other) => OfferError::Rejected(other.to_string()),
        }
    }
}

impl From<WatchError> for OfferError {
    fn from(error: WatchError) -> Self {
        match error {
            WatchError::TimedOut(after) => OfferError::TimedOut(after),
            WatchError::Cancelled => OfferError::Cancelled,
            WatchError::Codec(e) => OfferError::Codec(e),
        }
    }
}

/// Share-response failures.
#[derive(Error, Debug)]
pub enum ResponseError {
    /// The token is not one the store issued.
    #[error("invalid share token: {0}")]
    InvalidToken(String),

    /// The offer behind the token has expired.
    #[error("share offer expired: {0}")]
    Expired(String),

    /// The token was already redeemed.
    #[error("share token already consumed: {0}")]
    AlreadyConsumed(String),

    /// The grant could not be applied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The session is no longer valid.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// No terminal state within the watch timeout.
    #[error("response not processed within {0:?}")]
    TimedOut(Duration),

    /// The response watch was cancelled.
    #[error("response watch cancelled")]
    Cancelled,

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] ProtocolError),

    /// The shared path could not be persisted.
    #[error("local user store: {0}")]
    Storage(#[from] UserStoreError),
}

impl ResponseError {
    pub(crate) fn from_status(code: Option<StatusCode>, message: String) -> Self {
        match code {
            Some(StatusCode::Expired) => ResponseError::Expired(message),
            Some(StatusCode::AlreadyConsumed) => ResponseError::AlreadyConsumed(message),
            Some(StatusCode::PermissionDenied) | Some(StatusCode::Rejected) => {
                ResponseError::PermissionDenied(message)
            }
            Some(StatusCode::InvalidToken) | Some(StatusCode::Malformed) | None => {
                ResponseError::InvalidToken(message)
            }
        }
    }
}

impl From<TransportError> for ResponseError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unreachable(message) => ResponseError::Unreachable(message),
            TransportError::Store(StoreError::NotAuthenticated(message)) => {
                ResponseError::NotAuthenticated(message)
            }
            TransportError::Store(StoreError::Protocol(e)) => ResponseError::Codec(e),
            TransportError::Store(StoreError::InvalidRequest(message)) => {
                ResponseError::InvalidToken(message)
            }
            TransportError::Store(other) => ResponseError::PermissionDenied(other.to_string()),
        }
    }
}

impl From<WatchError> for ResponseError {
    fn from(error: WatchError) -> Self {
        match error {
            WatchError::TimedOut(after) => ResponseError::TimedOut(after),
            WatchError::Cancelled => ResponseError::Cancelled,
            WatchError::Codec(e) => ResponseError::Codec(e),
        }
    }
}

/// Failures on a synced partition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PartitionError {
    /// The session lacks the required right.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The partition does not exist.
    #[error("partition not found: {0}")]
    NotFound(String),

    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The session is no longer valid.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// The store refused the request.
    #[error("request refused: {0}")]
    Refused(String),

    /// Encoding or decoding failed.
    #[error(transparent)]
    Codec(#[from] ProtocolError),
}

impl From<TransportError> for PartitionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Unreachable(message) => PartitionError::Unreachable(message),
            TransportError::Store(StoreError::PermissionDenied(message)) => {
                PartitionError::PermissionDenied(message)
            }
            TransportError::Store(StoreError::PartitionNotFound(message)) => {
                PartitionError::NotFound(message)
            }
            TransportError::Store(StoreError::NotAuthenticated(message)) => {
                PartitionError::NotAuthenticated(message)
            }
            TransportError::Store(StoreError::Protocol(e)) => PartitionError::Codec(e),
            TransportError::Store(other) => PartitionError::Refused(other.to_string()),
        }
    }
}

/// The failure behind a handshake step.
#[derive(Error, Debug)]
pub enum StepError {
    /// Authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The share offer failed.
    #[error(transparent)]
    Offer(#[from] OfferError),

    /// Logging out failed.
    #[error(transparent)]
    Logout(#[from] LogoutError),

    /// The share response failed.
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Opening or reading the shared partition failed.
    #[error(transparent)]
    Partition(#[from] PartitionError),
}

/// A failed handshake run.
#[derive(Error, Debug)]
#[error("handshake failed in state {step}: {source}")]
pub struct HandshakeError {
    /// State the orchestrator was in when the step failed.
    pub step: HandshakeState,
    /// The underlying failure.
    pub source: StepError,
}

impl HandshakeError {
    /// Returns true if the run failed because an identity was already registered.
    pub fn is_already_exists(&self) -> bool {
        matches!(self.source, StepError::Auth(AuthError::AlreadyExists(_)))
    }
}
