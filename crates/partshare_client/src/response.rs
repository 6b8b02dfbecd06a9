//! Share responses awaiting the shared partition.

use crate::error::ResponseError;
use crate::user_store::{UserRecord, UserStore};
use crate::watch::RecordWatch;
use partshare_protocol::{ObjectId, PartitionUrl, RecordStatus, ShareResponse};
use std::sync::Arc;
use tracing::info;

/// A share response written to the store and watched until it is processed.
pub struct PendingResponse {
    response: ShareResponse,
    watch: RecordWatch,
    identity: String,
    username: String,
    users: Arc<dyn UserStore>,
}

impl PendingResponse {
    pub(crate) fn new(
        response: ShareResponse,
        watch: RecordWatch,
        identity: String,
        username: String,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            response,
            watch,
            identity,
            username,
            users,
        }
    }

    /// Id of the response record.
    pub fn id(&self) -> ObjectId {
        self.response.id
    }

    /// Returns true while the response's subscription is held.
    pub fn is_active(&self) -> bool {
        self.watch.is_active()
    }

    /// Waits for the store to redeem the token and returns the shared partition.
    ///
    /// On success the partition's owner segment is saved as the redeemer's
    /// shared partition path.
    pub async fn partition_url(&mut self) -> Result<PartitionUrl, ResponseError> {
        let settled: ShareResponse = self.watch.settled().await?;
        if settled.status != RecordStatus::Success {
            return Err(ResponseError::from_status(
                settled.status_code,
                settled.status_message.unwrap_or_default(),
            ));
        }
        let url = settled.partition_url.ok_or_else(|| {
            ResponseError::InvalidToken("response resolved without a partition".into())
        })?;

        let mut record = self
            .users
            .load(&self.identity)?
            .unwrap_or_else(|| UserRecord::new(self.username.clone(), None));
        record.shared_partition_path = Some(url.owner_segment().to_string());
        self.users.save(&self.identity, &record)?;

        info!(
            response = %settled.id,
            shared_partition = %url,
            "share token redeemed"
        );
        Ok(url)
    }

    /// Stops watching the response.
    pub fn cancel(&mut self) {
        self.watch.cancel();
    }
}
