//! Main store service.

use crate::accounts::AccountRegistry;
use crate::auth::{TokenPurpose, TokenSigner};
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::messages::{AuthGrant, AuthRequest};
use crate::partition::{PartitionRegistry, Subscription, SubscriptionId};
use crate::pipeline::{self, Job, ShareLedger};
use partshare_protocol::{
    HostConfig, ObjectId, ObjectKind, PartitionUrl, Permissions, RecordStatus, ShareOffer,
    ShareResponse, StoredObject,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State shared between request handlers and the pipeline task.
pub(crate) struct StoreState {
    pub config: StoreConfig,
    pub signer: TokenSigner,
    pub accounts: AccountRegistry,
    pub partitions: PartitionRegistry,
    pub ledger: ShareLedger,
}

/// The replicated store service.
///
/// Holds accounts, partitions and their ACLs, and runs the pipeline that
/// turns share offers into tokens and share responses into grants.
///
/// # Example
///
/// ```
/// use partshare_store::{StoreConfig, StoreServer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let server = StoreServer::start(StoreConfig::default()).unwrap();
/// assert_eq!(server.active_subscriptions(), 0);
/// # }
/// ```
pub struct StoreServer {
    state: Arc<StoreState>,
    jobs: mpsc::UnboundedSender<Job>,
    pipeline: JoinHandle<()>,
}

impl StoreServer {
    /// Starts a store and its processing pipeline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: StoreConfig) -> StoreResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| StoreError::Internal(format!("no tokio runtime: {e}")))?;

        let state = Arc::new(StoreState {
            signer: TokenSigner::new(config.secret.clone()),
            config,
            accounts: AccountRegistry::new(),
            partitions: PartitionRegistry::new(),
            ledger: ShareLedger::default(),
        });
        let (jobs, receiver) = mpsc::unbounded_channel();
        let pipeline = runtime.spawn(pipeline::run(Arc::clone(&state), receiver));

        info!(root = %state.config.host.root, "store started");
        Ok(Self {
            state,
            jobs,
            pipeline,
        })
    }

    /// Returns the host configuration partitions are addressed under.
    pub fn host(&self) -> &HostConfig {
        &self.state.config.host
    }

    /// Logs in or registers, and opens a session.
    pub fn authenticate(&self, request: &AuthRequest) -> StoreResult<AuthGrant> {
        let credential = &request.credential;
        let identity = if request.register {
            self.state.accounts.register(
                credential.username(),
                credential.password(),
                credential.email(),
            )?
        } else {
            self.state
                .accounts
                .verify(credential.username(), credential.password())?
        };

        let host = &self.state.config.host;
        let default_partition = host.user_partition(&identity)?;
        let management_partition = host.management_partition(&identity)?;
        self.state
            .partitions
            .create(default_partition.clone(), &identity);
        self.state
            .partitions
            .create(management_partition.clone(), &identity);

        let session = self.state.accounts.open_session(&identity);
        let access_token = self
            .state
            .signer
            .create_token(TokenPurpose::Access, session)?;

        info!(
            username = credential.username(),
            %identity,
            register = request.register,
            "session opened"
        );
        Ok(AuthGrant {
            identity,
            access_token,
            default_partition,
            management_partition,
            email: self.state.accounts.email_of(credential.username()),
        })
    }

    /// Closes the session behind an access token.
    ///
    /// Closing an already closed session succeeds. Subscriptions opened by
    /// the session are released.
    pub fn log_out(&self, access_token: &str) -> StoreResult<()> {
        let session = self.session_id(access_token)?;
        if self.state.accounts.close_session(&session) {
            let released = self.state.partitions.unsubscribe_session(&session);
            info!(released, "session closed");
        }
        Ok(())
    }

    /// Writes an object to a partition.
    ///
    /// Writes to a management partition queue the record for processing.
    pub fn write_object(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object: StoredObject,
    ) -> StoreResult<()> {
        let (_, identity) = self.session(access_token)?;

        if partition.is_management() {
            if self.state.partitions.owner(partition)? != identity {
                return Err(StoreError::PermissionDenied(format!(
                    "{identity} does not own {partition}"
                )));
            }
            if self.state.partitions.get(partition, &object.id)?.is_some() {
                return Err(StoreError::InvalidRequest(format!(
                    "record {} already written",
                    object.id
                )));
            }
            if management_status(&object)? != RecordStatus::Pending {
                return Err(StoreError::InvalidRequest(
                    "share records must be written as pending".into(),
                ));
            }

            let object_id = object.id;
            self.state.partitions.put(partition, object)?;
            self.jobs
                .send(Job {
                    partition: partition.clone(),
                    object_id,
                    identity,
                })
                .map_err(|_| StoreError::Internal("share pipeline stopped".into()))?;
            debug!(object = %object_id, %partition, "share record queued");
            return Ok(());
        }

        if object.kind.is_management() {
            return Err(StoreError::InvalidRequest(format!(
                "{} records belong in a management partition",
                object.kind.as_str()
            )));
        }
        if !self
            .state
            .partitions
            .permissions(partition, &identity)?
            .may_write
        {
            return Err(StoreError::PermissionDenied(format!(
                "{identity} may not write to {partition}"
            )));
        }

        debug!(object = %object.id, %partition, "object written");
        self.state.partitions.put(partition, object)
    }

    /// Reads every object of a partition.
    pub fn read_objects(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
    ) -> StoreResult<Vec<StoredObject>> {
        let (_, identity) = self.session(access_token)?;
        self.require_read(partition, &identity)?;
        self.state.partitions.objects(partition)
    }

    /// Subscribes to one object of a partition.
    pub fn subscribe(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object_id: ObjectId,
    ) -> StoreResult<Subscription> {
        let (session, identity) = self.session(access_token)?;
        self.require_read(partition, &identity)?;
        let subscription = self
            .state
            .partitions
            .subscribe(session, partition, object_id)?;
        debug!(subscription = %subscription.id, object = %object_id, "subscribed");
        Ok(subscription)
    }

    /// Releases a subscription. Returns false if it was not open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let released = self.state.partitions.unsubscribe(id);
        if released {
            debug!(subscription = %id, "unsubscribed");
        }
        released
    }

    /// Returns the number of open subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.state.partitions.subscription_count()
    }

    /// Returns the number of live sessions.
    pub fn active_sessions(&self) -> usize {
        self.state.accounts.session_count()
    }

    /// Returns the number of offers a token was issued for.
    pub fn issued_offers(&self) -> usize {
        self.state.ledger.len()
    }

    /// Returns the identity registered for a username.
    pub fn identity_of(&self, username: &str) -> Option<String> {
        self.state.accounts.identity_of(username)
    }

    /// Returns the rights an identity holds on a partition.
    pub fn permissions_of(
        &self,
        partition: &PartitionUrl,
        identity: &str,
    ) -> StoreResult<Permissions> {
        self.state.partitions.permissions(partition, identity)
    }

    fn session_id(&self, access_token: &str) -> StoreResult<[u8; 16]> {
        self.state.signer.validate_token(
            access_token,
            TokenPurpose::Access,
            Some(self.state.config.session_expiry),
        )
    }

    fn session(&self, access_token: &str) -> StoreResult<([u8; 16], String)> {
        let session = self.session_id(access_token)?;
        let identity = self
            .state
            .accounts
            .session_identity(&session)
            .ok_or_else(|| StoreError::NotAuthenticated("session closed".into()))?;
        Ok((session, identity))
    }

    fn require_read(&self, partition: &PartitionUrl, identity: &str) -> StoreResult<()> {
        if self
            .state
            .partitions
            .permissions(partition, identity)?
            .may_read
        {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied(format!(
                "{identity} may not read {partition}"
            )))
        }
    }
}

impl Drop for StoreServer {
    fn drop(&mut self) {
        self.pipeline.abort();
    }
}

fn management_status(object: &StoredObject) -> StoreResult<RecordStatus> {
    match object.kind {
        ObjectKind::ShareOffer => Ok(object.decode::<ShareOffer>()?.status),
        ObjectKind::ShareResponse => Ok(object.decode::<ShareResponse>()?.status),
        other => Err(StoreError::InvalidRequest(format!(
            "{} records do not belong in a management partition",
            other.as_str()
        ))),
    }
}
