//! Partitions, access-control lists and record subscriptions.

use crate::error::{StoreError, StoreResult};
use parking_lot::{Mutex, RwLock};
use partshare_protocol::{ObjectId, PartitionUrl, Permissions, StoredObject};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// A logically scoped slice of the store with its own ACL.
#[derive(Debug, Clone)]
pub struct Partition {
    owner: String,
    acl: HashMap<String, Permissions>,
    objects: BTreeMap<ObjectId, StoredObject>,
}

impl Partition {
    /// Creates an empty partition owned by `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            acl: HashMap::new(),
            objects: BTreeMap::new(),
        }
    }

    /// Returns the owning identity.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the rights `identity` holds on this partition.
    pub fn permissions_for(&self, identity: &str) -> Permissions {
        if identity == self.owner {
            Permissions::ALL
        } else {
            self.acl.get(identity).copied().unwrap_or(Permissions::NONE)
        }
    }

    /// Adds rights for `identity`, keeping any it already holds.
    pub fn grant(&mut self, identity: &str, permissions: Permissions) {
        let entry = self.acl.entry(identity.to_string()).or_default();
        *entry = entry.union(permissions);
    }

    /// Returns an object by id.
    pub fn get(&self, id: &ObjectId) -> Option<&StoredObject> {
        self.objects.get(id)
    }

    /// Inserts or replaces an object.
    pub fn put(&mut self, object: StoredObject) {
        self.objects.insert(object.id, object);
    }

    /// Returns all objects.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.values().cloned().collect()
    }
}

/// Identifier of a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live query on one object: the receiver sees the latest snapshot.
#[derive(Debug)]
pub struct Subscription {
    /// Subscription id, needed to unsubscribe.
    pub id: SubscriptionId,
    /// Snapshot stream; `None` until the object exists.
    pub receiver: watch::Receiver<Option<StoredObject>>,
}

struct SubscriptionEntry {
    session: [u8; 16],
    partition: PartitionUrl,
    object_id: ObjectId,
    sender: watch::Sender<Option<StoredObject>>,
}

/// All partitions of the store plus the subscriptions watching them.
pub struct PartitionRegistry {
    partitions: RwLock<HashMap<PartitionUrl, Partition>>,
    subscriptions: Mutex<HashMap<SubscriptionId, SubscriptionEntry>>,
    next_subscription: AtomicU64,
}

impl PartitionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Creates a partition unless it already exists.
    pub fn create(&self, url: PartitionUrl, owner: &str) {
        self.partitions
            .write()
            .entry(url)
            .or_insert_with(|| Partition::new(owner));
    }

    /// Returns the rights of `identity` on a partition.
    pub fn permissions(&self, url: &PartitionUrl, identity: &str) -> StoreResult<Permissions> {
        self.with_partition(url, |p| p.permissions_for(identity))
    }

    /// Returns the owner of a partition.
    pub fn owner(&self, url: &PartitionUrl) -> StoreResult<String> {
        self.with_partition(url, |p| p.owner().to_string())
    }

    /// Adds rights for `identity` on a partition.
    pub fn grant(
        &self,
        url: &PartitionUrl,
        identity: &str,
        permissions: Permissions,
    ) -> StoreResult<()> {
        let mut partitions = self.partitions.write();
        let partition = partitions
            .get_mut(url)
            .ok_or_else(|| StoreError::PartitionNotFound(url.to_string()))?;
        partition.grant(identity, permissions);
        Ok(())
    }

    /// Returns one object of a partition.
    pub fn get(&self, url: &PartitionUrl, id: &ObjectId) -> StoreResult<Option<StoredObject>> {
        self.with_partition(url, |p| p.get(id).cloned())
    }

    /// Returns every object of a partition.
    pub fn objects(&self, url: &PartitionUrl) -> StoreResult<Vec<StoredObject>> {
        self.with_partition(url, Partition::objects)
    }

    /// Stores an object and notifies its subscribers.
    pub fn put(&self, url: &PartitionUrl, object: StoredObject) -> StoreResult<()> {
        {
            let mut partitions = self.partitions.write();
            let partition = partitions
                .get_mut(url)
                .ok_or_else(|| StoreError::PartitionNotFound(url.to_string()))?;
            partition.put(object.clone());
        }
        self.notify(url, object);
        Ok(())
    }

    /// Opens a subscription on one object.
    ///
    /// The receiver starts with the object's current state.
    pub fn subscribe(
        &self,
        session: [u8; 16],
        url: &PartitionUrl,
        object_id: ObjectId,
    ) -> StoreResult<Subscription> {
        // Hold the subscription lock across the read so a concurrent put
        // either lands in the initial snapshot or is notified afterwards.
        let mut subscriptions = self.subscriptions.lock();
        let current = self.get(url, &object_id)?;
        let (sender, receiver) = watch::channel(current);
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));

        subscriptions.insert(
            id,
            SubscriptionEntry {
                session,
                partition: url.clone(),
                object_id,
                sender,
            },
        );

        Ok(Subscription { id, receiver })
    }

    /// Closes a subscription. Returns false if it was not open.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions.lock().remove(&id).is_some()
    }

    /// Closes every subscription opened by a session.
    pub fn unsubscribe_session(&self, session: &[u8; 16]) -> usize {
        let mut subscriptions = self.subscriptions.lock();
        let before = subscriptions.len();
        subscriptions.retain(|_, entry| entry.session != *session);
        before - subscriptions.len()
    }

    /// Returns the number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    fn notify(&self, url: &PartitionUrl, object: StoredObject) {
        let subscriptions = self.subscriptions.lock();
        for entry in subscriptions.values() {
            if entry.object_id == object.id && entry.partition == *url {
                entry.sender.send_replace(Some(object.clone()));
            }
        }
    }

    fn with_partition<R>(
        &self,
        url: &PartitionUrl,
        f: impl FnOnce(&Partition) -> R,
    ) -> StoreResult<R> {
        let partitions = self.partitions.read();
        partitions
            .get(url)
            .map(f)
            .ok_or_else(|| StoreError::PartitionNotFound(url.to_string()))
    }
}

impl Default for PartitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use partshare_protocol::{Dog, TypedRecord};

    fn url(path: &str) -> PartitionUrl {
        PartitionUrl::parse(format!("partshare://h:1/{path}")).unwrap()
    }

    #[test]
    fn owner_has_all_rights() {
        let mut partition = Partition::new("alice");
        assert_eq!(partition.permissions_for("alice"), Permissions::ALL);
        assert_eq!(partition.permissions_for("bob"), Permissions::NONE);

        partition.grant("bob", Permissions::READ);
        partition.grant("bob", Permissions::new(false, true, false));
        assert_eq!(partition.permissions_for("bob"), Permissions::READ_WRITE);
    }

    #[test]
    fn unknown_partition() {
        let registry = PartitionRegistry::new();
        let result = registry.objects(&url("nobody/app"));
        assert!(matches!(result, Err(StoreError::PartitionNotFound(_))));
    }

    #[test]
    fn put_and_read() {
        let registry = PartitionRegistry::new();
        let p = url("alice/app");
        registry.create(p.clone(), "alice");

        let dog = Dog::new("Rex", "alice").to_object().unwrap();
        registry.put(&p, dog.clone()).unwrap();

        assert_eq!(registry.objects(&p).unwrap(), vec![dog.clone()]);
        assert_eq!(registry.get(&p, &dog.id).unwrap(), Some(dog));
        assert_eq!(registry.owner(&p).unwrap(), "alice");
    }

    #[test]
    fn create_is_idempotent() {
        let registry = PartitionRegistry::new();
        let p = url("alice/app");
        registry.create(p.clone(), "alice");
        registry.put(&p, Dog::new("Rex", "alice").to_object().unwrap()).unwrap();

        registry.create(p.clone(), "mallory");
        assert_eq!(registry.owner(&p).unwrap(), "alice");
        assert_eq!(registry.objects(&p).unwrap().len(), 1);
    }

    #[test]
    fn subscription_sees_updates() {
        let registry = PartitionRegistry::new();
        let p = url("alice/app");
        registry.create(p.clone(), "alice");

        let mut dog = Dog::new("Rex", "alice");
        let mut sub = registry.subscribe([1u8; 16], &p, dog.id).unwrap();
        assert!(sub.receiver.borrow_and_update().is_none());

        registry.put(&p, dog.to_object().unwrap()).unwrap();
        assert!(sub.receiver.has_changed().unwrap());

        dog.name = "Max".into();
        registry.put(&p, dog.to_object().unwrap()).unwrap();
        let latest: Dog = sub
            .receiver
            .borrow_and_update()
            .as_ref()
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(latest.name, "Max");
    }

    #[test]
    fn unsubscribe_closes_channel() {
        let registry = PartitionRegistry::new();
        let p = url("alice/app");
        registry.create(p.clone(), "alice");

        let sub = registry.subscribe([1u8; 16], &p, ObjectId::new()).unwrap();
        assert_eq!(registry.subscription_count(), 1);

        assert!(registry.unsubscribe(sub.id));
        assert!(!registry.unsubscribe(sub.id));
        assert_eq!(registry.subscription_count(), 0);
        assert!(sub.receiver.has_changed().is_err());
    }

    #[test]
    fn unsubscribe_session() {
        let registry = PartitionRegistry::new();
        let p = url("alice/app");
        registry.create(p.clone(), "alice");

        registry.subscribe([1u8; 16], &p, ObjectId::new()).unwrap();
        registry.subscribe([1u8; 16], &p, ObjectId::new()).unwrap();
        registry.subscribe([2u8; 16], &p, ObjectId::new()).unwrap();

        assert_eq!(registry.unsubscribe_session(&[1u8; 16]), 2);
        assert_eq!(registry.subscription_count(), 1);
    }
}
