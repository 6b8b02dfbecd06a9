//! # PartShare Client
//!
//! Client side of the PartShare permission-sharing handshake.
//!
//! This crate provides:
//! - Authentication with retry and a single current session per client
//! - Share offers and share responses watched until the store resolves them
//! - Synced partitions with an explicit download step
//! - Local persistence of user records and registration flags
//! - The two-party handshake orchestrator
//!
//! ## Flow
//!
//! The owner writes a [`ShareOffer`](partshare_protocol::ShareOffer) and
//! waits for the store to turn it into a token. The owner then logs out.
//! The redeemer authenticates, writes a
//! [`ShareResponse`](partshare_protocol::ShareResponse) carrying the token
//! and waits for the URL of the shared partition. The owner segment of that
//! URL is saved locally, so the shared partition can be rebuilt later.
//!
//! ## Key Invariants
//!
//! - A token is redeemed at most once
//! - The owner's logout is acknowledged before the redeemer authenticates
//! - Only the first terminal snapshot of a watched record counts
//! - A freshly opened partition is empty until it is synchronized

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handshake;
mod offer;
mod partition;
mod response;
mod session;
mod transport;
mod user_store;
mod watch;

pub use config::{ClientConfig, RetryConfig};
pub use error::{
    AuthError, HandshakeError, LogoutError, OfferError, PartitionError, ResponseError, StepError,
    TransportError, TransportResult, UserStoreError, UserStoreResult, WatchError,
};
pub use handshake::{Handshake, HandshakeOutcome, HandshakeState, Party};
pub use offer::PendingOffer;
pub use partition::SyncedPartition;
pub use response::PendingResponse;
pub use session::{Session, ShareClient, SEED_DOG_NAME};
pub use transport::{
    FaultyTransport, InProcessTransport, Operation, Phase, StoreTransport, TransportEvent,
};
pub use user_store::{FileUserStore, MemoryUserStore, UserRecord, UserStore};
pub use watch::{RecordWatch, Tracked};
