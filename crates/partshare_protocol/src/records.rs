//! Typed records and their stored form.
//!
//! Partitions hold opaque [`StoredObject`]s. Each object carries a kind tag
//! and a CBOR payload; [`TypedRecord`] converts between the two forms.

use crate::error::{ProtocolError, ProtocolResult};
use crate::permission::{Permissions, RecordStatus, StatusCode};
use crate::url::PartitionUrl;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique id of an object within the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an id from raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Kind tag of a stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// A [`ShareOffer`].
    ShareOffer,
    /// A [`ShareResponse`].
    ShareResponse,
    /// A [`Dog`].
    Dog,
}

impl ObjectKind {
    /// Returns the kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::ShareOffer => "ShareOffer",
            ObjectKind::ShareResponse => "ShareResponse",
            ObjectKind::Dog => "Dog",
        }
    }

    /// Returns true for kinds that live in management partitions.
    pub fn is_management(&self) -> bool {
        matches!(self, ObjectKind::ShareOffer | ObjectKind::ShareResponse)
    }
}

/// An object as held by a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object id.
    pub id: ObjectId,
    /// Kind of the encoded record.
    pub kind: ObjectKind,
    /// CBOR-encoded record.
    pub payload: Vec<u8>,
}

impl StoredObject {
    /// Decodes the payload as a typed record.
    pub fn decode<R: TypedRecord>(&self) -> ProtocolResult<R> {
        if self.kind != R::KIND {
            return Err(ProtocolError::KindMismatch {
                expected: R::KIND.as_str().into(),
                found: self.kind.as_str().into(),
            });
        }
        R::decode_cbor(&self.payload)
    }
}

/// Trait for CBOR encoding.
pub trait CborEncode {
    /// Encodes self to CBOR bytes.
    fn encode_cbor(&self) -> ProtocolResult<Vec<u8>>;
}

/// Trait for CBOR decoding.
pub trait CborDecode: Sized {
    /// Decodes self from CBOR bytes.
    fn decode_cbor(bytes: &[u8]) -> ProtocolResult<Self>;
}

impl<T: Serialize> CborEncode for T {
    fn encode_cbor(&self) -> ProtocolResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| ProtocolError::Encode(e.to_string()))?;
        Ok(buf)
    }
}

impl<T: DeserializeOwned> CborDecode for T {
    fn decode_cbor(bytes: &[u8]) -> ProtocolResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// A record that can be stored in a partition.
pub trait TypedRecord: Serialize + DeserializeOwned {
    /// Kind tag written alongside the payload.
    const KIND: ObjectKind;

    /// Object id of this record.
    fn object_id(&self) -> ObjectId;

    /// Encodes this record as a stored object.
    fn to_object(&self) -> ProtocolResult<StoredObject> {
        Ok(StoredObject {
            id: self.object_id(),
            kind: Self::KIND,
            payload: self.encode_cbor()?,
        })
    }
}

/// Request to share a partition with whoever redeems the resulting token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareOffer {
    /// Record id.
    pub id: ObjectId,
    /// Partition being shared, as written by the client.
    pub partition_url: String,
    /// Rights granted to the redeemer.
    pub permissions: Permissions,
    /// Offer expiry; `None` never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Processing status.
    pub status: RecordStatus,
    /// Failure reason when status is `Error`.
    pub status_code: Option<StatusCode>,
    /// Human-readable status detail.
    pub status_message: Option<String>,
    /// Redeemable token, present once status is `Success`.
    pub token: Option<String>,
}

impl ShareOffer {
    /// Creates a pending offer for a partition.
    pub fn new(
        partition_url: &PartitionUrl,
        permissions: Permissions,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: ObjectId::new(),
            partition_url: partition_url.to_string(),
            permissions,
            expires_at,
            created_at: Utc::now(),
            status: RecordStatus::Pending,
            status_code: None,
            status_message: None,
            token: None,
        }
    }

    /// Returns true if the offer has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Marks the offer successful with an issued token.
    pub fn resolve_success(&mut self, token: String) {
        self.status = RecordStatus::Success;
        self.status_code = None;
        self.status_message = None;
        self.token = Some(token);
    }

    /// Marks the offer failed.
    pub fn resolve_error(&mut self, code: StatusCode, message: impl Into<String>) {
        self.status = RecordStatus::Error;
        self.status_code = Some(code);
        self.status_message = Some(message.into());
        self.token = None;
    }
}

impl TypedRecord for ShareOffer {
    const KIND: ObjectKind = ObjectKind::ShareOffer;

    fn object_id(&self) -> ObjectId {
        self.id
    }
}

/// Request to redeem a share token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareResponse {
    /// Record id.
    pub id: ObjectId,
    /// Token being redeemed.
    pub token: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Processing status.
    pub status: RecordStatus,
    /// Failure reason when status is `Error`.
    pub status_code: Option<StatusCode>,
    /// Human-readable status detail.
    pub status_message: Option<String>,
    /// Shared partition, present once status is `Success`.
    pub partition_url: Option<PartitionUrl>,
}

impl ShareResponse {
    /// Creates a pending response for a token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            token: token.into(),
            created_at: Utc::now(),
            status: RecordStatus::Pending,
            status_code: None,
            status_message: None,
            partition_url: None,
        }
    }

    /// Marks the response successful.
    pub fn resolve_success(&mut self, partition_url: PartitionUrl) {
        self.status = RecordStatus::Success;
        self.status_code = None;
        self.status_message = None;
        self.partition_url = Some(partition_url);
    }

    /// Marks the response failed.
    pub fn resolve_error(&mut self, code: StatusCode, message: impl Into<String>) {
        self.status = RecordStatus::Error;
        self.status_code = Some(code);
        self.status_message = Some(message.into());
        self.partition_url = None;
    }
}

impl TypedRecord for ShareResponse {
    const KIND: ObjectKind = ObjectKind::ShareResponse;

    fn object_id(&self) -> ObjectId {
        self.id
    }
}

/// Owned demo record seeded into every new user's partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dog {
    /// Record id.
    pub id: ObjectId,
    /// Dog name.
    pub name: String,
    /// Username of the owner.
    pub owner: String,
}

impl Dog {
    /// Creates a dog owned by `owner`.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl TypedRecord for Dog {
    const KIND: ObjectKind = ObjectKind::Dog;

    fn object_id(&self) -> ObjectId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn url() -> PartitionUrl {
        PartitionUrl::parse("partshare://h:1/owner/app").unwrap()
    }

    #[test]
    fn offer_lifecycle() {
        let mut offer = ShareOffer::new(&url(), Permissions::READ_WRITE, None);
        assert_eq!(offer.status, RecordStatus::Pending);
        assert!(offer.token.is_none());

        offer.resolve_success("tok".into());
        assert_eq!(offer.status, RecordStatus::Success);
        assert_eq!(offer.token.as_deref(), Some("tok"));

        offer.resolve_error(StatusCode::Rejected, "nope");
        assert_eq!(offer.status, RecordStatus::Error);
        assert!(offer.token.is_none());
        assert_eq!(offer.status_code, Some(StatusCode::Rejected));
    }

    #[test]
    fn offer_expiry() {
        let now = Utc::now();
        let offer = ShareOffer::new(&url(), Permissions::READ, Some(now - Duration::seconds(1)));
        assert!(offer.is_expired_at(now));

        let offer = ShareOffer::new(&url(), Permissions::READ, None);
        assert!(!offer.is_expired_at(now));
    }

    #[test]
    fn stored_object_decode() {
        let dog = Dog::new("Rex", "user1");
        let object = dog.to_object().unwrap();
        assert_eq!(object.kind, ObjectKind::Dog);
        assert_eq!(object.id, dog.id);

        let back: Dog = object.decode().unwrap();
        assert_eq!(back, dog);

        let wrong: ProtocolResult<ShareOffer> = object.decode();
        assert!(matches!(wrong, Err(ProtocolError::KindMismatch { .. })));
    }

    #[test]
    fn response_keeps_url() {
        let mut response = ShareResponse::new("tok");
        response.resolve_success(url());
        let object = response.to_object().unwrap();
        let back: ShareResponse = object.decode().unwrap();
        assert_eq!(back.partition_url, Some(url()));
        assert_eq!(back.status, RecordStatus::Success);
    }

    #[test]
    fn garbage_payload_fails_to_decode() {
        let object = StoredObject {
            id: ObjectId::new(),
            kind: ObjectKind::Dog,
            payload: vec![0xff, 0x00, 0x13],
        };
        let result: ProtocolResult<Dog> = object.decode();
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn object_id_display_is_hex() {
        let id = ObjectId::from_bytes([0xab; 16]);
        assert_eq!(id.to_string(), "ab".repeat(16));
    }
}
