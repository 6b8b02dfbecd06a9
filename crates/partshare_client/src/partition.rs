//! Locally replicated view of a store partition.

use crate::error::PartitionError;
use crate::transport::StoreTransport;
use parking_lot::RwLock;
use partshare_protocol::{ObjectId, PartitionUrl, StoredObject, TypedRecord};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A partition opened by a session.
///
/// The local replica starts empty. Reads only see what has been downloaded
/// by [`synchronize`](Self::synchronize) or written through this handle.
pub struct SyncedPartition {
    url: PartitionUrl,
    access_token: String,
    transport: Arc<dyn StoreTransport>,
    replica: RwLock<BTreeMap<ObjectId, StoredObject>>,
    synchronized: AtomicBool,
}

impl SyncedPartition {
    pub(crate) fn new(
        url: PartitionUrl,
        access_token: String,
        transport: Arc<dyn StoreTransport>,
    ) -> Self {
        Self {
            url,
            access_token,
            transport,
            replica: RwLock::new(BTreeMap::new()),
            synchronized: AtomicBool::new(false),
        }
    }

    /// Returns the partition URL.
    pub fn url(&self) -> &PartitionUrl {
        &self.url
    }

    /// Returns true once a download has completed.
    pub fn is_synchronized(&self) -> bool {
        self.synchronized.load(Ordering::SeqCst)
    }

    /// Downloads the store's current objects into the local replica.
    ///
    /// Returns the number of objects held afterwards.
    pub async fn synchronize(&self) -> Result<usize, PartitionError> {
        let objects = self
            .transport
            .read_objects(&self.access_token, &self.url)
            .await?;

        let count = objects.len();
        *self.replica.write() = objects.into_iter().map(|o| (o.id, o)).collect();
        self.synchronized.store(true, Ordering::SeqCst);
        debug!(partition = %self.url, count, "partition synchronized");
        Ok(count)
    }

    /// Returns every object in the local replica.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.replica.read().values().cloned().collect()
    }

    /// Decodes every local object of kind `R`.
    pub fn records<R: TypedRecord>(&self) -> Result<Vec<R>, PartitionError> {
        self.replica
            .read()
            .values()
            .filter(|o| o.kind == R::KIND)
            .map(|o| o.decode::<R>().map_err(PartitionError::from))
            .collect()
    }

    /// Returns the number of local objects.
    pub fn len(&self) -> usize {
        self.replica.read().len()
    }

    /// Returns true if the local replica is empty.
    pub fn is_empty(&self) -> bool {
        self.replica.read().is_empty()
    }

    /// Writes a record through the store and into the local replica.
    pub async fn write<R: TypedRecord + Sync>(&self, record: &R) -> Result<(), PartitionError> {
        let object = record.to_object()?;
        self.transport
            .write_object(&self.access_token, &self.url, object.clone())
            .await?;
        self.replica.write().insert(object.id, object);
        Ok(())
    }
}

impl std::fmt::Debug for SyncedPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedPartition")
            .field("url", &self.url)
            .field("objects", &self.len())
            .field("synchronized", &self.is_synchronized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessTransport;
    use partshare_protocol::{Credential, Dog};
    use partshare_store::{AuthRequest, StoreConfig, StoreServer};

    #[tokio::test]
    async fn empty_until_synchronized() {
        let server = Arc::new(StoreServer::start(StoreConfig::default()).unwrap());
        let transport: Arc<dyn StoreTransport> = Arc::new(InProcessTransport::new(server));
        let grant = transport
            .authenticate(&AuthRequest::register(Credential::new("user1", "user1")))
            .await
            .unwrap();

        let writer = SyncedPartition::new(
            grant.default_partition.clone(),
            grant.access_token.clone(),
            Arc::clone(&transport),
        );
        writer.write(&Dog::new("Rex", "user1")).await.unwrap();
        assert_eq!(writer.len(), 1);

        let reader = SyncedPartition::new(
            grant.default_partition.clone(),
            grant.access_token.clone(),
            transport,
        );
        assert!(reader.is_empty());
        assert!(!reader.is_synchronized());

        assert_eq!(reader.synchronize().await.unwrap(), 1);
        let dogs: Vec<Dog> = reader.records().unwrap();
        assert_eq!(dogs.len(), 1);
        assert_eq!(dogs[0].name, "Rex");
    }
}
