//! Transport layer between the client and the store.

use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use partshare_protocol::{ObjectId, PartitionUrl, StoredObject};
use partshare_store::{AuthGrant, AuthRequest, StoreServer, Subscription, SubscriptionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A store transport carries client requests to the store.
///
/// This trait abstracts the connection so the handshake can run against an
/// in-process store, a fault-injecting wrapper in tests, or a remote store.
#[async_trait]
pub trait StoreTransport: Send + Sync {
    /// Logs in or registers.
    async fn authenticate(&self, request: &AuthRequest) -> TransportResult<AuthGrant>;

    /// Closes a session. Resolves once the store acknowledged it.
    async fn log_out(&self, access_token: &str) -> TransportResult<()>;

    /// Writes an object to a partition.
    async fn write_object(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object: StoredObject,
    ) -> TransportResult<()>;

    /// Reads every object of a partition.
    async fn read_objects(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
    ) -> TransportResult<Vec<StoredObject>>;

    /// Subscribes to one object of a partition.
    async fn subscribe(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object_id: ObjectId,
    ) -> TransportResult<Subscription>;

    /// Releases a subscription. Returns false if it was not open.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Transport calling a [`StoreServer`] in the same process.
pub struct InProcessTransport {
    server: Arc<StoreServer>,
    latency: Duration,
}

impl InProcessTransport {
    /// Creates a transport without latency.
    pub fn new(server: Arc<StoreServer>) -> Self {
        Self {
            server,
            latency: Duration::ZERO,
        }
    }

    /// Adds simulated latency to every request.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    async fn hop(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl StoreTransport for InProcessTransport {
    async fn authenticate(&self, request: &AuthRequest) -> TransportResult<AuthGrant> {
        self.hop().await;
        Ok(self.server.authenticate(request)?)
    }

    async fn log_out(&self, access_token: &str) -> TransportResult<()> {
        self.hop().await;
        Ok(self.server.log_out(access_token)?)
    }

    async fn write_object(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object: StoredObject,
    ) -> TransportResult<()> {
        self.hop().await;
        Ok(self.server.write_object(access_token, partition, object)?)
    }

    async fn read_objects(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
    ) -> TransportResult<Vec<StoredObject>> {
        self.hop().await;
        Ok(self.server.read_objects(access_token, partition)?)
    }

    async fn subscribe(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object_id: ObjectId,
    ) -> TransportResult<Subscription> {
        self.hop().await;
        Ok(self.server.subscribe(access_token, partition, object_id)?)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.server.unsubscribe(id)
    }
}

/// Transport operations, as recorded by [`FaultyTransport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `authenticate`
    Authenticate,
    /// `log_out`
    LogOut,
    /// `write_object`
    WriteObject,
    /// `read_objects`
    ReadObjects,
    /// `subscribe`
    Subscribe,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Authenticate => "authenticate",
            Operation::LogOut => "log_out",
            Operation::WriteObject => "write_object",
            Operation::ReadObjects => "read_objects",
            Operation::Subscribe => "subscribe",
        };
        f.write_str(name)
    }
}

/// Progress of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The request left the client.
    Sent,
    /// The store replied, successfully or not.
    Replied,
    /// The request failed before reaching the store.
    Failed,
}

/// One entry of the [`FaultyTransport`] event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportEvent {
    /// The operation.
    pub operation: Operation,
    /// What happened to it.
    pub phase: Phase,
}

#[derive(Default)]
struct Faults {
    delays: HashMap<Operation, Duration>,
    failures: HashMap<Operation, u32>,
}

impl Faults {
    fn take_failure(&mut self, operation: Operation) -> bool {
        match self.failures.get_mut(&operation) {
            Some(0) | None => false,
            Some(remaining) => {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                true
            }
        }
    }
}

/// A transport wrapper that injects delays and failures and logs every request.
pub struct FaultyTransport<T> {
    inner: T,
    faults: Mutex<Faults>,
    events: Mutex<Vec<TransportEvent>>,
}

impl<T: StoreTransport> FaultyTransport<T> {
    /// Wraps a transport without injecting anything.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Delays every request of `operation` before forwarding it.
    pub fn delay(&self, operation: Operation, delay: Duration) {
        self.faults.lock().delays.insert(operation, delay);
    }

    /// Fails the next `times` requests of `operation` as unreachable.
    pub fn fail(&self, operation: Operation, times: u32) {
        self.faults.lock().failures.insert(operation, times);
    }

    /// Fails every request of `operation` as unreachable.
    pub fn fail_always(&self, operation: Operation) {
        self.fail(operation, u32::MAX);
    }

    /// Returns the recorded events in order.
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Returns how many requests of `operation` were sent.
    pub fn attempts(&self, operation: Operation) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.operation == operation && e.phase == Phase::Sent)
            .count()
    }

    fn record(&self, operation: Operation, phase: Phase) {
        self.events.lock().push(TransportEvent { operation, phase });
    }

    async fn send(&self, operation: Operation) -> TransportResult<()> {
        self.record(operation, Phase::Sent);
        let (delay, fail) = {
            let mut faults = self.faults.lock();
            let delay = faults.delays.get(&operation).copied();
            (delay, faults.take_failure(operation))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            self.record(operation, Phase::Failed);
            return Err(TransportError::Unreachable(format!(
                "injected failure on {operation}"
            )));
        }
        Ok(())
    }

    fn reply<R>(&self, operation: Operation, result: TransportResult<R>) -> TransportResult<R> {
        self.record(operation, Phase::Replied);
        result
    }
}

#[async_trait]
impl<T: StoreTransport> StoreTransport for FaultyTransport<T> {
    async fn authenticate(&self, request: &AuthRequest) -> TransportResult<AuthGrant> {
        self.send(Operation::Authenticate).await?;
        let result = self.inner.authenticate(request).await;
        self.reply(Operation::Authenticate, result)
    }

    async fn log_out(&self, access_token: &str) -> TransportResult<()> {
        self.send(Operation::LogOut).await?;
        let result = self.inner.log_out(access_token).await;
        self.reply(Operation::LogOut, result)
    }

    async fn write_object(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object: StoredObject,
    ) -> TransportResult<()> {
        self.send(Operation::WriteObject).await?;
        let result = self.inner.write_object(access_token, partition, object).await;
        self.reply(Operation::WriteObject, result)
    }

    async fn read_objects(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
    ) -> TransportResult<Vec<StoredObject>> {
        self.send(Operation::ReadObjects).await?;
        let result = self.inner.read_objects(access_token, partition).await;
        self.reply(Operation::ReadObjects, result)
    }

    async fn subscribe(
        &self,
        access_token: &str,
        partition: &PartitionUrl,
        object_id: ObjectId,
    ) -> TransportResult<Subscription> {
        self.send(Operation::Subscribe).await?;
        let result = self.inner.subscribe(access_token, partition, object_id).await;
        self.reply(Operation::Subscribe, result)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.unsubscribe(id)
    }
}
