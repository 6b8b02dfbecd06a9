//! # PartShare Store
//!
//! In-process replicated object store backing the PartShare handshake.
//!
//! This crate provides:
//! - Account registration, login and session tokens (HMAC-SHA256)
//! - Partitions with per-identity access-control lists
//! - Live subscriptions on individual records
//! - The share pipeline that resolves offers and responses
//!
//! # Share pipeline
//!
//! Each identity owns a default data partition and a management partition.
//! Writing a pending [`ShareOffer`](partshare_protocol::ShareOffer) to the
//! management partition asks the store to mint a share token; writing a
//! pending [`ShareResponse`](partshare_protocol::ShareResponse) redeems one.
//! The pipeline resolves each record asynchronously, after
//! [`StoreConfig::processing_delay`], and writes the terminal status back so
//! subscribers see it.
//!
//! A token may be redeemed once. Redeeming adds the offered rights to the
//! redeemer's ACL entry on the offered partition.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod accounts;
mod auth;
mod config;
mod error;
mod messages;
mod partition;
mod pipeline;
mod server;

pub use accounts::AccountRegistry;
pub use auth::{PasswordDigest, TokenPurpose, TokenSigner};
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use messages::{AuthGrant, AuthRequest};
pub use partition::{Partition, PartitionRegistry, Subscription, SubscriptionId};
pub use server::StoreServer;
