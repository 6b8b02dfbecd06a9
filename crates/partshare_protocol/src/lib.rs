//! # PartShare Protocol
//!
//! Records and addressing for the PartShare permission-sharing handshake.
//!
//! This crate provides:
//! - `Credential` for authenticating against a store
//! - `PartitionUrl` and `HostConfig` for partition addressing
//! - `ShareOffer` / `ShareResponse` management records
//! - `StoredObject` and CBOR encoding/decoding of typed records
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Handshake
//!
//! 1. The owner writes a `ShareOffer` into its management partition
//! 2. The store turns the offer into a single-use token
//! 3. The redeemer writes a `ShareResponse` carrying the token
//! 4. The store grants access and answers with the shared partition URL

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod credential;
mod error;
mod permission;
mod records;
mod url;

pub use credential::Credential;
pub use error::{ProtocolError, ProtocolResult};
pub use permission::{Permissions, RecordStatus, StatusCode};
pub use records::{
    CborDecode, CborEncode, Dog, ObjectId, ObjectKind, ShareOffer, ShareResponse, StoredObject,
    TypedRecord,
};
pub use url::{HostConfig, PartitionUrl, MANAGEMENT_SEGMENT};
