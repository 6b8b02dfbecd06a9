//! Client entry point and authenticated sessions.

use crate::config::ClientConfig;
use crate::error::{
    AuthError, LogoutError, OfferError, PartitionError, ResponseError, TransportError,
};
use crate::offer::PendingOffer;
use crate::partition::SyncedPartition;
use crate::response::PendingResponse;
use crate::transport::StoreTransport;
use crate::user_store::{UserRecord, UserStore};
use crate::watch::RecordWatch;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use partshare_protocol::{
    Credential, Dog, HostConfig, PartitionUrl, Permissions, ShareOffer, ShareResponse,
    TypedRecord,
};
use partshare_store::{AuthGrant, AuthRequest, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the dog seeded into every newly registered user's partition.
pub const SEED_DOG_NAME: &str = "Rex";

#[derive(Debug, Clone)]
struct CurrentSession {
    identity: String,
    access_token: String,
}

type Slot = Arc<Mutex<Option<CurrentSession>>>;

/// Authenticates against a store and hands out [`Session`]s.
///
/// At most one session is current per client. A second
/// [`authenticate`](Self::authenticate) fails with
/// [`AuthError::SessionActive`] until the current session logs out or is
/// dropped.
pub struct ShareClient {
    config: ClientConfig,
    transport: Arc<dyn StoreTransport>,
    users: Arc<dyn UserStore>,
    current: Slot,
}

impl ShareClient {
    /// Creates a client.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn StoreTransport>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            config,
            transport,
            users,
            current: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Returns the local user store.
    pub fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    /// Returns the identity of the current session, if any.
    pub fn current_identity(&self) -> Option<String> {
        self.current.lock().as_ref().map(|c| c.identity.clone())
    }

    /// Logs in, or registers when `register` is set.
    ///
    /// Registration seeds the default partition with one [`Dog`] and
    /// creates the local user record. Unreachable stores are retried per
    /// [`RetryConfig`](crate::RetryConfig).
    pub async fn authenticate(
        &self,
        credential: &Credential,
        register: bool,
    ) -> Result<Session, AuthError> {
        self.ensure_free()?;

        let request = if register {
            AuthRequest::register(credential.clone())
        } else {
            AuthRequest::log_in(credential.clone())
        };
        let grant = self.authenticate_with_retry(&request).await?;

        let session = Session {
            identity: grant.identity.clone(),
            username: credential.username().to_string(),
            access_token: grant.access_token.clone(),
            default_partition: grant.default_partition.clone(),
            management_partition: grant.management_partition.clone(),
            config: self.config.clone(),
            transport: Arc::clone(&self.transport),
            users: Arc::clone(&self.users),
            slot: Arc::clone(&self.current),
            closed: AtomicBool::new(false),
        };

        // another authenticate may have won the slot while this one was in flight
        let taken = {
            let mut current = self.current.lock();
            let other = current.as_ref().map(|c| c.identity.clone());
            if other.is_none() {
                *current = Some(CurrentSession {
                    identity: grant.identity.clone(),
                    access_token: grant.access_token.clone(),
                });
            }
            other
        };
        if let Some(identity) = taken {
            if let Err(e) = self.transport.log_out(&grant.access_token).await {
                warn!(error = %e, "could not close losing session");
            }
            return Err(AuthError::SessionActive(identity));
        }

        if register {
            session.seed().await?;
            self.users.mark_registered(credential.username())?;
        }
        if self.users.load(&grant.identity)?.is_none() {
            self.users.save(
                &grant.identity,
                &UserRecord::new(
                    credential.username(),
                    credential
                        .email()
                        .map(str::to_string)
                        .or_else(|| grant.email.clone()),
                ),
            )?;
        }

        log_user_info(&grant, credential.username());
        Ok(session)
    }

    fn ensure_free(&self) -> Result<(), AuthError> {
        match self.current.lock().as_ref() {
            Some(current) => Err(AuthError::SessionActive(current.identity.clone())),
            None => Ok(()),
        }
    }

    async fn authenticate_with_retry(&self, request: &AuthRequest) -> Result<AuthGrant, AuthError> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let delay = retry.delay_before(attempt);
            if !delay.is_zero() {
                debug!(attempt, ?delay, "waiting before retry");
                tokio::time::sleep(delay).await;
            }

            match self.transport.authenticate(request).await {
                Ok(grant) => return Ok(grant),
                Err(e) if e.is_retryable() && retry.allows_retry(attempt) => {
                    warn!(attempt, max_attempts = retry.max_attempts, error = %e, "authentication failed, retrying");
                }
                Err(e) => return Err(AuthError::from_transport(e, attempt)),
            }
        }
    }
}

fn log_user_info(grant: &AuthGrant, username: &str) {
    info!(
        username,
        identity = %grant.identity,
        email = grant.email.as_deref().unwrap_or("-"),
        default_partition = %grant.default_partition,
        management_partition = %grant.management_partition,
        "user info"
    );
}

/// One authenticated identity's connection to the store.
pub struct Session {
    identity: String,
    username: String,
    access_token: String,
    default_partition: PartitionUrl,
    management_partition: PartitionUrl,
    config: ClientConfig,
    transport: Arc<dyn StoreTransport>,
    users: Arc<dyn UserStore>,
    slot: Slot,
    closed: AtomicBool,
}

impl Session {
    /// Identity assigned by the store.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Username the session authenticated with.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The identity's default data partition.
    pub fn default_partition(&self) -> &PartitionUrl {
        &self.default_partition
    }

    /// The identity's management partition.
    pub fn management_partition(&self) -> &PartitionUrl {
        &self.management_partition
    }

    /// Store root and application path.
    pub fn host(&self) -> &HostConfig {
        &self.config.host
    }

    /// Returns true once the session has logged out.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns the local user record of this identity.
    pub fn user_record(&self) -> Result<Option<UserRecord>, crate::UserStoreError> {
        self.users.load(&self.identity)
    }

    /// Rebuilds the shared partition URL from the persisted shared path.
    pub fn shared_partition(&self) -> Result<Option<PartitionUrl>, crate::UserStoreError> {
        let path = self
            .user_record()?
            .and_then(|record| record.shared_partition_path);
        Ok(path.and_then(|path| self.config.host.shared_partition(&path).ok()))
    }

    /// Offers rights on the default partition to whoever redeems the token.
    pub async fn create_share_offer(
        &self,
        permissions: Permissions,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<PendingOffer, OfferError> {
        let offer = ShareOffer::new(&self.default_partition, permissions, expires_at);
        self.transport
            .write_object(&self.access_token, &self.management_partition, offer.to_object()?)
            .await?;
        let subscription = self
            .transport
            .subscribe(&self.access_token, &self.management_partition, offer.id)
            .await?;
        info!(offer = %offer.id, partition = %offer.partition_url, "share offer written");

        let watch = RecordWatch::new(
            Arc::clone(&self.transport),
            subscription,
            self.config.watch_timeout,
        );
        Ok(PendingOffer::new(offer, watch))
    }

    /// Redeems a share token.
    pub async fn accept_share_token(&self, token: &str) -> Result<PendingResponse, ResponseError> {
        let response = ShareResponse::new(token);
        self.transport
            .write_object(
                &self.access_token,
                &self.management_partition,
                response.to_object()?,
            )
            .await?;
        let subscription = self
            .transport
            .subscribe(&self.access_token, &self.management_partition, response.id)
            .await?;
        info!(response = %response.id, "share response written");

        let watch = RecordWatch::new(
            Arc::clone(&self.transport),
            subscription,
            self.config.watch_timeout,
        );
        Ok(PendingResponse::new(
            response,
            watch,
            self.identity.clone(),
            self.username.clone(),
            Arc::clone(&self.users),
        ))
    }

    /// Redeems a share token and waits for the shared partition.
    pub async fn accept_share_token_and_wait(
        &self,
        token: &str,
    ) -> Result<PartitionUrl, ResponseError> {
        self.accept_share_token(token).await?.partition_url().await
    }

    /// Opens a partition. Its local replica starts empty.
    pub fn open_partition(&self, url: PartitionUrl) -> SyncedPartition {
        SyncedPartition::new(url, self.access_token.clone(), Arc::clone(&self.transport))
    }

    /// Copies the dogs of a shared partition into the default partition.
    ///
    /// Returns the number of dogs copied.
    pub async fn import_shared_records(
        &self,
        shared: &SyncedPartition,
    ) -> Result<usize, PartitionError> {
        let dogs: Vec<Dog> = shared.records()?;
        let own = self.open_partition(self.default_partition.clone());
        for dog in &dogs {
            own.write(&Dog::new(dog.name.clone(), dog.owner.clone())).await?;
        }
        info!(count = dogs.len(), from = %shared.url(), "shared records imported");
        Ok(dogs.len())
    }

    /// Logs out and waits for the store to acknowledge.
    ///
    /// Logging out twice succeeds.
    pub async fn log_out(&self) -> Result<(), LogoutError> {
        if self.is_closed() {
            return Ok(());
        }
        match self.transport.log_out(&self.access_token).await {
            Ok(()) => {}
            // the store already dropped this session
            Err(TransportError::Store(StoreError::NotAuthenticated(reason))) => {
                debug!(identity = %self.identity, %reason, "session already closed by the store");
            }
            Err(e) => return Err(LogoutError::Unreachable(e.to_string())),
        }
        self.closed.store(true, Ordering::SeqCst);
        self.abandon();
        info!(identity = %self.identity, "logged out");
        Ok(())
    }

    async fn seed(&self) -> Result<(), AuthError> {
        let dog = Dog::new(SEED_DOG_NAME, self.username.clone());
        let object = dog
            .to_object()
            .map_err(|e| AuthError::Other(e.to_string()))?;
        self.transport
            .write_object(&self.access_token, &self.default_partition, object)
            .await
            .map_err(|e| AuthError::Other(format!("seeding default partition: {e}")))?;
        debug!(dog = %dog.name, partition = %self.default_partition, "default partition seeded");
        Ok(())
    }

    /// Frees the client's current slot if this session holds it.
    fn abandon(&self) {
        let mut current = self.slot.lock();
        if current
            .as_ref()
            .is_some_and(|c| c.access_token == self.access_token)
        {
            *current = None;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abandon();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("username", &self.username)
            .field("default_partition", &self.default_partition)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::InProcessTransport;
    use crate::user_store::MemoryUserStore;
    use partshare_store::{StoreConfig, StoreServer};
    use std::time::Duration;

    fn client() -> (Arc<StoreServer>, ShareClient) {
        let server = Arc::new(
            StoreServer::start(StoreConfig::default().with_processing_delay(Duration::ZERO))
                .unwrap(),
        );
        let client = ShareClient::new(
            ClientConfig::default().with_retry(RetryConfig::no_retry()),
            Arc::new(InProcessTransport::new(Arc::clone(&server))),
            Arc::new(MemoryUserStore::new()),
        );
        (server, client)
    }

    #[tokio::test]
    async fn register_seeds_and_records_user() {
        let (_server, client) = client();
        let credential = Credential::with_email("user1", "user1", "user1@123.nl");
        let session = client.authenticate(&credential, true).await.unwrap();

        let record = session.user_record().unwrap().unwrap();
        assert_eq!(record.username, "user1");
        assert_eq!(record.email.as_deref(), Some("user1@123.nl"));
        assert!(client.users().registered("user1").unwrap());

        let partition = session.open_partition(session.default_partition().clone());
        partition.synchronize().await.unwrap();
        let dogs: Vec<Dog> = partition.records().unwrap();
        assert_eq!(dogs.len(), 1);
        assert_eq!(dogs[0].name, SEED_DOG_NAME);
        assert_eq!(dogs[0].owner, "user1");
    }

    #[tokio::test]
    async fn one_current_session() {
        let (_server, client) = client();
        let user1 = client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        assert_eq!(client.current_identity().as_deref(), Some(user1.identity()));

        let result = client.authenticate(&Credential::new("user2", "user2"), true).await;
        assert!(matches!(result, Err(AuthError::SessionActive(_))));

        user1.log_out().await.unwrap();
        user1.log_out().await.unwrap();
        assert!(client.current_identity().is_none());

        client
            .authenticate(&Credential::new("user2", "user2"), true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn log_out_after_store_expiry_closes_locally() {
        let server = Arc::new(
            StoreServer::start(
                StoreConfig::default()
                    .with_processing_delay(Duration::ZERO)
                    .with_session_expiry(Duration::from_millis(100)),
            )
            .unwrap(),
        );
        let client = ShareClient::new(
            ClientConfig::default().with_retry(RetryConfig::no_retry()),
            Arc::new(InProcessTransport::new(server)),
            Arc::new(MemoryUserStore::new()),
        );
        let session = client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        session.log_out().await.unwrap();
        assert!(session.is_closed());
        assert!(client.current_identity().is_none());
        session.log_out().await.unwrap();
    }

    #[tokio::test]
    async fn dropping_session_frees_slot() {
        let (_server, client) = client();
        let session = client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        drop(session);
        assert!(client.current_identity().is_none());

        let again = client
            .authenticate(&Credential::new("user1", "user1"), false)
            .await
            .unwrap();
        assert_eq!(again.username(), "user1");
    }

    #[tokio::test]
    async fn login_errors() {
        let (_server, client) = client();
        let result = client.authenticate(&Credential::new("ghost", "pw"), false).await;
        assert!(matches!(result, Err(AuthError::NotFound(_))));

        client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        // the session above was dropped, freeing the slot
        let result = client.authenticate(&Credential::new("user1", "nope"), false).await;
        assert!(matches!(result, Err(AuthError::InvalidCredential(_))));
    }

    #[tokio::test]
    async fn closed_session_cannot_offer() {
        let (_server, client) = client();
        let session = client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        session.log_out().await.unwrap();

        let result = session.create_share_offer(Permissions::READ, None).await;
        assert!(matches!(result, Err(OfferError::NotAuthenticated(_))));
    }

    #[tokio::test]
    async fn shared_partition_from_record() {
        let (_server, client) = client();
        let session = client
            .authenticate(&Credential::new("user1", "user1"), true)
            .await
            .unwrap();
        assert_eq!(session.shared_partition().unwrap(), None);

        let mut record = session.user_record().unwrap().unwrap();
        record.shared_partition_path = Some("abc".into());
        client.users().save(session.identity(), &record).unwrap();

        let url = session.shared_partition().unwrap().unwrap();
        assert_eq!(url.as_str(), "partshare://127.0.0.1:9080/abc/permissionchangedemo");
    }
}
