//! Two-party permission-sharing handshake.
//!
//! The orchestrator walks one owner and one redeemer through the full
//! exchange:
//!
//! 1. authenticate the owner
//! 2. offer rights on the owner's default partition and wait for the token
//! 3. log the owner out and wait for the acknowledgement
//! 4. authenticate the redeemer
//! 5. redeem the token and wait for the shared partition URL
//! 6. download the shared partition and read its dogs
//!
//! Any failure moves the orchestrator to [`HandshakeState::Error`] and is
//! returned as a [`HandshakeError`] naming the state it failed in. Nothing
//! is rolled back.

use crate::error::{HandshakeError, ResponseError, StepError};
use crate::session::{Session, ShareClient};
use chrono::{Duration, Utc};
use partshare_protocol::{Credential, Dog, PartitionUrl, Permissions};
use std::fmt;
use tracing::{info, warn};

/// States of the handshake orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Nothing has happened yet.
    Init,
    /// Authenticating the owner.
    AuthenticatingA,
    /// Waiting for the offer's token.
    OfferPending,
    /// Logging the owner out.
    LoggedOutA,
    /// Authenticating the redeemer.
    AuthenticatingB,
    /// Waiting for the shared partition URL.
    ResponsePending,
    /// The redeemer has read the shared partition.
    Done,
    /// A step failed.
    Error,
}

impl HandshakeState {
    /// Returns true for `Done` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Done | HandshakeState::Error)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakeState::Init => "init",
            HandshakeState::AuthenticatingA => "authenticating owner",
            HandshakeState::OfferPending => "offer pending",
            HandshakeState::LoggedOutA => "owner logged out",
            HandshakeState::AuthenticatingB => "authenticating redeemer",
            HandshakeState::ResponsePending => "response pending",
            HandshakeState::Done => "done",
            HandshakeState::Error => "error",
        };
        f.write_str(name)
    }
}

/// One side of the handshake.
#[derive(Debug, Clone)]
pub struct Party {
    /// Credentials to authenticate with.
    pub credential: Credential,
    /// Register instead of logging in.
    pub register: bool,
}

impl Party {
    /// A party that registers a new identity.
    pub fn register(credential: Credential) -> Self {
        Self {
            credential,
            register: true,
        }
    }

    /// A party that logs in to an existing identity.
    pub fn log_in(credential: Credential) -> Self {
        Self {
            credential,
            register: false,
        }
    }
}

/// Result of a completed handshake.
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// The redeemer's session, still logged in.
    pub session: Session,
    /// Shared partition URL as resolved by the store.
    pub shared_url: PartitionUrl,
    /// Owner segment persisted as the redeemer's shared partition path.
    pub shared_path: String,
    /// The redeemer's download of the shared partition.
    pub dogs: Vec<Dog>,
}

/// Orchestrates one handshake run.
pub struct Handshake<'a> {
    client: &'a ShareClient,
    owner: Party,
    redeemer: Party,
    permissions: Permissions,
    expires_in: Option<Duration>,
    state: HandshakeState,
    history: Vec<HandshakeState>,
}

impl<'a> Handshake<'a> {
    /// Creates an orchestrator offering read and write rights.
    pub fn new(client: &'a ShareClient, owner: Party, redeemer: Party) -> Self {
        Self {
            client,
            owner,
            redeemer,
            permissions: Permissions::READ_WRITE,
            expires_in: None,
            state: HandshakeState::Init,
            history: vec![HandshakeState::Init],
        }
    }

    /// Sets the rights offered to the redeemer.
    pub fn with_permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Makes the offer expire `ttl` after it is written.
    pub fn with_expiry(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Every state entered so far, in order.
    pub fn history(&self) -> &[HandshakeState] {
        &self.history
    }

    /// Runs the handshake to completion.
    pub async fn run(&mut self) -> Result<HandshakeOutcome, HandshakeError> {
        self.enter(HandshakeState::AuthenticatingA);
        let owner = match self
            .client
            .authenticate(&self.owner.credential, self.owner.register)
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(HandshakeState::OfferPending);
        let expires_at = self.expires_in.map(|ttl| Utc::now() + ttl);
        let token = match owner.create_share_offer(self.permissions, expires_at).await {
            Ok(mut offer) => offer.token().await,
            Err(e) => Err(e),
        };
        let token = match token {
            Ok(token) => token,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(HandshakeState::LoggedOutA);
        if let Err(e) = owner.log_out().await {
            return Err(self.fail(e));
        }
        drop(owner);

        self.enter(HandshakeState::AuthenticatingB);
        let redeemer = match self
            .client
            .authenticate(&self.redeemer.credential, self.redeemer.register)
            .await
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(HandshakeState::ResponsePending);
        let shared_url = match redeemer.accept_share_token_and_wait(&token).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(e)),
        };
        let shared_path = shared_url.owner_segment().to_string();
        match redeemer.shared_partition() {
            Ok(Some(rebuilt)) if rebuilt == shared_url => {}
            Ok(rebuilt) => warn!(
                resolved = %shared_url,
                rebuilt = ?rebuilt.map(|u| u.to_string()),
                "persisted shared path does not rebuild the resolved partition"
            ),
            Err(e) => return Err(self.fail(ResponseError::from(e))),
        }

        let shared = redeemer.open_partition(shared_url.clone());
        if let Err(e) = shared.synchronize().await {
            return Err(self.fail(e));
        }
        let dogs: Vec<Dog> = match shared.records() {
            Ok(dogs) => dogs,
            Err(e) => return Err(self.fail(e)),
        };

        self.enter(HandshakeState::Done);
        info!(
            shared_partition = %shared_url,
            dogs = dogs.len(),
            "handshake complete"
        );
        Ok(HandshakeOutcome {
            session: redeemer,
            shared_url,
            shared_path,
            dogs,
        })
    }

    fn enter(&mut self, state: HandshakeState) {
        info!(from = %self.state, to = %state, "handshake transition");
        self.state = state;
        self.history.push(state);
    }

    fn fail(&mut self, source: impl Into<StepError>) -> HandshakeError {
        let step = self.state;
        let source = source.into();
        warn!(%step, error = %source, "handshake failed");
        self.state = HandshakeState::Error;
        self.history.push(HandshakeState::Error);
        HandshakeError { step, source }
    }
}
