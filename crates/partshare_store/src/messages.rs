//! Request and reply types of the store's auth endpoint.

use partshare_protocol::{Credential, PartitionUrl};

/// Login or registration request.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    /// Credentials to check or register.
    pub credential: Credential,
    /// Create a new identity instead of logging in.
    pub register: bool,
}

impl AuthRequest {
    /// Creates a login request.
    pub fn log_in(credential: Credential) -> Self {
        Self {
            credential,
            register: false,
        }
    }

    /// Creates a registration request.
    pub fn register(credential: Credential) -> Self {
        Self {
            credential,
            register: true,
        }
    }
}

/// Successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthGrant {
    /// Identity of the account.
    pub identity: String,
    /// Signed access token for subsequent requests.
    pub access_token: String,
    /// The identity's default data partition.
    pub default_partition: PartitionUrl,
    /// The identity's management partition.
    pub management_partition: PartitionUrl,
    /// Email given at registration.
    pub email: Option<String>,
}
