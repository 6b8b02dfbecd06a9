//! Registered accounts and live sessions.

use crate::auth::PasswordDigest;
use crate::error::{StoreError, StoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

struct Account {
    identity: String,
    password: PasswordDigest,
    email: Option<String>,
}

/// Accounts keyed by username, and sessions keyed by session id.
pub struct AccountRegistry {
    accounts: RwLock<HashMap<String, Account>>,
    sessions: RwLock<HashMap<[u8; 16], String>>,
}

impl AccountRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a new account and returns its identity.
    pub fn register(
        &self,
        username: &str,
        password: &str,
        email: Option<&str>,
    ) -> StoreResult<String> {
        if username.is_empty() {
            return Err(StoreError::InvalidRequest("empty username".into()));
        }

        let mut accounts = self.accounts.write();
        if accounts.contains_key(username) {
            return Err(StoreError::AlreadyExists(username.to_string()));
        }

        let identity = Uuid::new_v4().simple().to_string();
        accounts.insert(
            username.to_string(),
            Account {
                identity: identity.clone(),
                password: PasswordDigest::create(password)?,
                email: email.map(str::to_string),
            },
        );
        Ok(identity)
    }

    /// Checks a password and returns the account identity.
    pub fn verify(&self, username: &str, password: &str) -> StoreResult<String> {
        let accounts = self.accounts.read();
        let account = accounts
            .get(username)
            .ok_or_else(|| StoreError::UnknownUser(username.to_string()))?;
        if !account.password.verify(password)? {
            return Err(StoreError::InvalidCredential(username.to_string()));
        }
        Ok(account.identity.clone())
    }

    /// Returns the identity of a username.
    pub fn identity_of(&self, username: &str) -> Option<String> {
        self.accounts
            .read()
            .get(username)
            .map(|a| a.identity.clone())
    }

    /// Returns the email registered for a username.
    pub fn email_of(&self, username: &str) -> Option<String> {
        self.accounts
            .read()
            .get(username)
            .and_then(|a| a.email.clone())
    }

    /// Opens a session for an identity and returns the session id.
    pub fn open_session(&self, identity: &str) -> [u8; 16] {
        let session = *Uuid::new_v4().as_bytes();
        self.sessions.write().insert(session, identity.to_string());
        session
    }

    /// Returns the identity behind a live session.
    pub fn session_identity(&self, session: &[u8; 16]) -> Option<String> {
        self.sessions.read().get(session).cloned()
    }

    /// Closes a session. Returns false if it was not open.
    pub fn close_session(&self, session: &[u8; 16]) -> bool {
        self.sessions.write().remove(session).is_some()
    }

    /// Returns the number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl Default for AccountRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_verify() {
        let accounts = AccountRegistry::new();
        let identity = accounts
            .register("user1", "user1", Some("user1@123.nl"))
            .unwrap();
        assert_eq!(identity.len(), 32);

        assert_eq!(accounts.verify("user1", "user1").unwrap(), identity);
        assert_eq!(accounts.identity_of("user1"), Some(identity));
        assert_eq!(accounts.email_of("user1").as_deref(), Some("user1@123.nl"));
    }

    #[test]
    fn duplicate_registration() {
        let accounts = AccountRegistry::new();
        accounts.register("user1", "user1", None).unwrap();
        let result = accounts.register("user1", "other", None);
        assert!(matches!(result, Err(StoreError::AlreadyExists(_))));
        assert!(accounts.verify("user1", "user1").is_ok());
    }

    #[test]
    fn login_failures() {
        let accounts = AccountRegistry::new();
        accounts.register("user1", "user1", None).unwrap();

        assert!(matches!(
            accounts.verify("user9", "user9"),
            Err(StoreError::UnknownUser(_))
        ));
        assert!(matches!(
            accounts.verify("user1", "wrong"),
            Err(StoreError::InvalidCredential(_))
        ));
    }

    #[test]
    fn empty_username_rejected() {
        let accounts = AccountRegistry::new();
        assert!(matches!(
            accounts.register("", "pw", None),
            Err(StoreError::InvalidRequest(_))
        ));
    }

    #[test]
    fn session_lifecycle() {
        let accounts = AccountRegistry::new();
        let session = accounts.open_session("abc");
        assert_eq!(accounts.session_identity(&session).as_deref(), Some("abc"));
        assert_eq!(accounts.session_count(), 1);

        assert!(accounts.close_session(&session));
        assert!(!accounts.close_session(&session));
        assert_eq!(accounts.session_identity(&session), None);
    }
}
