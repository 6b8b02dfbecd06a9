//! Token signing and password digests.
//!
//! Access tokens and share tokens use the same HMAC-SHA256 scheme with a
//! purpose byte, so a share token can never be presented as an access token
//! or the other way round.
//!
//! ## Token Format
//!
//! - 1 byte: purpose
//! - 16 bytes: subject (session id or offer id)
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 25 bytes
//!
//! Total: 57 bytes, URL-safe base64 (no padding) for transport.

use crate::error::{StoreError, StoreResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 57;
const SIGNED_LEN: usize = 25;

/// What a token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenPurpose {
    /// Identifies an authenticated session.
    Access = 1,
    /// Redeems a share offer.
    Share = 2,
}

/// Creates and validates signed tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl TokenSigner {
    /// Creates a signer with the given secret.
    pub fn new(secret: Vec<u8>) -> Self {
        Self { secret }
    }

    /// Creates a token for a subject.
    pub fn create_token(&self, purpose: TokenPurpose, subject: [u8; 16]) -> StoreResult<String> {
        let timestamp = now_millis();

        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.push(purpose as u8);
        data.extend_from_slice(&subject);
        data.extend_from_slice(&timestamp.to_be_bytes());

        let signature = self.sign(&data)?;
        data.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(data))
    }

    /// Validates a token and returns its subject.
    ///
    /// With `max_age`, tokens older than that are rejected.
    pub fn validate_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
        max_age: Option<Duration>,
    ) -> StoreResult<[u8; 16]> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| StoreError::NotAuthenticated("token is not base64".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(StoreError::NotAuthenticated("invalid token length".into()));
        }

        let (signed, signature) = bytes.split_at(SIGNED_LEN);
        let mut mac = self.mac()?;
        mac.update(signed);
        mac.verify_slice(signature)
            .map_err(|_| StoreError::NotAuthenticated("invalid signature".into()))?;

        if signed[0] != purpose as u8 {
            return Err(StoreError::NotAuthenticated("wrong token purpose".into()));
        }

        let mut subject = [0u8; 16];
        subject.copy_from_slice(&signed[1..17]);
        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&signed[17..25]);

        if let Some(max_age) = max_age {
            let issued = u64::from_be_bytes(timestamp);
            let max_age = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
            if now_millis() > issued.saturating_add(max_age) {
                return Err(StoreError::NotAuthenticated("token expired".into()));
            }
        }

        Ok(subject)
    }

    fn mac(&self) -> StoreResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| StoreError::Internal(format!("hmac key: {e}")))
    }

    fn sign(&self, data: &[u8]) -> StoreResult<[u8; 32]> {
        let mut mac = self.mac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().into())
    }
}

/// Salted password digest as kept in an account.
#[derive(Clone)]
pub struct PasswordDigest {
    salt: [u8; 16],
    digest: [u8; 32],
}

impl PasswordDigest {
    /// Digests a password with a fresh random salt.
    pub fn create(password: &str) -> StoreResult<Self> {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = Self::compute(&salt, password)?.finalize().into_bytes().into();
        Ok(Self { salt, digest })
    }

    /// Checks a password against the digest in constant time.
    pub fn verify(&self, password: &str) -> StoreResult<bool> {
        Ok(Self::compute(&self.salt, password)?
            .verify_slice(&self.digest)
            .is_ok())
    }

    fn compute(salt: &[u8; 16], password: &str) -> StoreResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(salt)
            .map_err(|e| StoreError::Internal(format!("hmac key: {e}")))?;
        mac.update(password.as_bytes());
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(b"test-secret-key-32-bytes-long!!".to_vec())
    }

    #[test]
    fn create_and_validate_token() {
        let signer = signer();
        let subject = [7u8; 16];

        let token = signer.create_token(TokenPurpose::Share, subject).unwrap();
        let back = signer
            .validate_token(&token, TokenPurpose::Share, None)
            .unwrap();
        assert_eq!(back, subject);
    }

    #[test]
    fn reject_wrong_purpose() {
        let signer = signer();
        let token = signer.create_token(TokenPurpose::Share, [1u8; 16]).unwrap();
        let result = signer.validate_token(&token, TokenPurpose::Access, None);
        assert!(matches!(result, Err(StoreError::NotAuthenticated(_))));
    }

    #[test]
    fn reject_tampered_token() {
        let signer = signer();
        let token = signer.create_token(TokenPurpose::Access, [1u8; 16]).unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[40] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        assert!(signer
            .validate_token(&tampered, TokenPurpose::Access, None)
            .is_err());
    }

    #[test]
    fn reject_foreign_secret() {
        let token = signer().create_token(TokenPurpose::Share, [1u8; 16]).unwrap();
        let other = TokenSigner::new(b"another-secret".to_vec());
        assert!(other.validate_token(&token, TokenPurpose::Share, None).is_err());
    }

    #[test]
    fn reject_garbage() {
        let signer = signer();
        assert!(signer
            .validate_token("not a token!", TokenPurpose::Share, None)
            .is_err());
        assert!(signer
            .validate_token("AAAA", TokenPurpose::Share, None)
            .is_err());
    }

    #[test]
    fn reject_expired_token() {
        let signer = signer();
        let token = signer.create_token(TokenPurpose::Access, [1u8; 16]).unwrap();

        std::thread::sleep(Duration::from_millis(10));

        let result = signer.validate_token(&token, TokenPurpose::Access, Some(Duration::ZERO));
        assert!(result.is_err());
        assert!(signer
            .validate_token(&token, TokenPurpose::Access, Some(Duration::from_secs(60)))
            .is_ok());
    }

    #[test]
    fn password_digest() {
        let digest = PasswordDigest::create("user1").unwrap();
        assert!(digest.verify("user1").unwrap());
        assert!(!digest.verify("user2").unwrap());

        // same password, different salt
        let other = PasswordDigest::create("user1").unwrap();
        assert_ne!(digest.digest, other.digest);
    }
}
