//! Cancellable watches on management records.

use crate::error::WatchError;
use crate::transport::StoreTransport;
use partshare_protocol::{RecordStatus, ShareOffer, ShareResponse, StoredObject, TypedRecord};
use partshare_store::{Subscription, SubscriptionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// A record the store moves from pending to a terminal status.
pub trait Tracked: TypedRecord {
    /// Current status of the record.
    fn status(&self) -> RecordStatus;
}

impl Tracked for ShareOffer {
    fn status(&self) -> RecordStatus {
        self.status
    }
}

impl Tracked for ShareResponse {
    fn status(&self) -> RecordStatus {
        self.status
    }
}

/// A subscription guard that waits for a record's first terminal snapshot.
///
/// The subscription is released once a terminal snapshot arrives, on
/// timeout, on [`cancel`](Self::cancel) and on drop.
pub struct RecordWatch {
    transport: Arc<dyn StoreTransport>,
    subscription: Option<SubscriptionId>,
    receiver: watch::Receiver<Option<StoredObject>>,
    timeout: Duration,
}

impl RecordWatch {
    pub(crate) fn new(
        transport: Arc<dyn StoreTransport>,
        subscription: Subscription,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            subscription: Some(subscription.id),
            receiver: subscription.receiver,
            timeout,
        }
    }

    /// Returns true while the subscription is held.
    pub fn is_active(&self) -> bool {
        self.subscription.is_some()
    }

    /// Waits for the first terminal snapshot of the record.
    ///
    /// Earlier non-terminal snapshots are skipped. Fails with
    /// [`WatchError::Cancelled`] once the watch has been released.
    pub async fn settled<R: Tracked>(&mut self) -> Result<R, WatchError> {
        if self.subscription.is_none() {
            return Err(WatchError::Cancelled);
        }

        let timeout = self.timeout;
        let result = match tokio::time::timeout(timeout, first_terminal(&mut self.receiver)).await
        {
            Ok(result) => result,
            Err(_) => Err(WatchError::TimedOut(timeout)),
        };
        self.release();
        result
    }

    /// Releases the subscription.
    pub fn cancel(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(id) = self.subscription.take() {
            let released = self.transport.unsubscribe(id);
            debug!(subscription = %id, released, "record watch released");
        }
    }
}

impl Drop for RecordWatch {
    fn drop(&mut self) {
        self.release();
    }
}

async fn first_terminal<R: Tracked>(
    receiver: &mut watch::Receiver<Option<StoredObject>>,
) -> Result<R, WatchError> {
    loop {
        let settled = {
            let snapshot = receiver.borrow_and_update();
            match snapshot.as_ref() {
                Some(object) => {
                    let record: R = object.decode()?;
                    record.status().is_terminal().then_some(record)
                }
                None => None,
            }
        };
        if let Some(record) = settled {
            return Ok(record);
        }
        if receiver.changed().await.is_err() {
            return Err(WatchError::Cancelled);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::InProcessTransport;
    use partshare_protocol::{Credential, Permissions, StatusCode};
    use partshare_store::{AuthGrant, AuthRequest, StoreConfig, StoreServer};

    async fn setup(delay: Duration) -> (Arc<StoreServer>, Arc<dyn StoreTransport>, AuthGrant) {
        let server = Arc::new(
            StoreServer::start(StoreConfig::default().with_processing_delay(delay)).unwrap(),
        );
        let transport: Arc<dyn StoreTransport> =
            Arc::new(InProcessTransport::new(Arc::clone(&server)));
        let grant = transport
            .authenticate(&AuthRequest::register(Credential::new("user1", "user1")))
            .await
            .unwrap();
        (server, transport, grant)
    }

    async fn watch_offer(
        transport: &Arc<dyn StoreTransport>,
        grant: &AuthGrant,
        offer: &ShareOffer,
        timeout: Duration,
    ) -> RecordWatch {
        transport
            .write_object(
                &grant.access_token,
                &grant.management_partition,
                offer.to_object().unwrap(),
            )
            .await
            .unwrap();
        let subscription = transport
            .subscribe(&grant.access_token, &grant.management_partition, offer.id)
            .await
            .unwrap();
        RecordWatch::new(Arc::clone(transport), subscription, timeout)
    }

    #[tokio::test]
    async fn settles_and_releases() {
        let (server, transport, grant) = setup(Duration::from_millis(10)).await;
        let offer = ShareOffer::new(&grant.default_partition, Permissions::READ, None);
        let mut watch = watch_offer(&transport, &grant, &offer, Duration::from_secs(5)).await;
        assert_eq!(server.active_subscriptions(), 1);

        let settled: ShareOffer = watch.settled().await.unwrap();
        assert_eq!(settled.status, RecordStatus::Success);
        assert!(!watch.is_active());
        assert_eq!(server.active_subscriptions(), 0);

        let again = watch.settled::<ShareOffer>().await;
        assert_eq!(again.unwrap_err(), WatchError::Cancelled);
    }

    #[tokio::test]
    async fn terminal_error_is_a_settled_record() {
        let (_server, transport, grant) = setup(Duration::ZERO).await;
        let offer = ShareOffer::new(&grant.default_partition, Permissions::NONE, None);
        let mut watch = watch_offer(&transport, &grant, &offer, Duration::from_secs(5)).await;

        let settled: ShareOffer = watch.settled().await.unwrap();
        assert_eq!(settled.status_code, Some(StatusCode::Malformed));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases() {
        let (server, transport, grant) = setup(Duration::from_secs(60)).await;
        let offer = ShareOffer::new(&grant.default_partition, Permissions::READ, None);
        let mut watch = watch_offer(&transport, &grant, &offer, Duration::from_secs(1)).await;

        let result = watch.settled::<ShareOffer>().await;
        assert_eq!(result.unwrap_err(), WatchError::TimedOut(Duration::from_secs(1)));
        assert_eq!(server.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn cancel_and_drop_release() {
        let (server, transport, grant) = setup(Duration::from_secs(60)).await;
        let first = ShareOffer::new(&grant.default_partition, Permissions::READ, None);
        let second = ShareOffer::new(&grant.default_partition, Permissions::READ, None);

        let mut cancelled = watch_offer(&transport, &grant, &first, Duration::from_secs(5)).await;
        let dropped = watch_offer(&transport, &grant, &second, Duration::from_secs(5)).await;
        assert_eq!(server.active_subscriptions(), 2);

        cancelled.cancel();
        assert_eq!(server.active_subscriptions(), 1);
        assert_eq!(
            cancelled.settled::<ShareOffer>().await.unwrap_err(),
            WatchError::Cancelled
        );

        drop(dropped);
        assert_eq!(server.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn closed_subscription_is_cancelled() {
        let (_server, transport, grant) = setup(Duration::from_secs(60)).await;
        let offer = ShareOffer::new(&grant.default_partition, Permissions::READ, None);
        let mut watch = watch_offer(&transport, &grant, &offer, Duration::from_secs(5)).await;

        transport.log_out(&grant.access_token).await.unwrap();
        let result = watch.settled::<ShareOffer>().await;
        assert_eq!(result.unwrap_err(), WatchError::Cancelled);
    }
}
