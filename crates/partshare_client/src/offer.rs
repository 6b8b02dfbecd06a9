//! Share offers awaiting their token.

use crate::error::OfferError;
use crate::watch::RecordWatch;
use partshare_protocol::{ObjectId, RecordStatus, ShareOffer};
use tracing::info;

/// A share offer written to the store and watched until it is processed.
pub struct PendingOffer {
    offer: ShareOffer,
    watch: RecordWatch,
}

impl PendingOffer {
    pub(crate) fn new(offer: ShareOffer, watch: RecordWatch) -> Self {
        Self { offer, watch }
    }

    /// Id of the offer record.
    pub fn id(&self) -> ObjectId {
        self.offer.id
    }

    /// The offer as written.
    pub fn offer(&self) -> &ShareOffer {
        &self.offer
    }

    /// Returns true while the offer's subscription is held.
    pub fn is_active(&self) -> bool {
        self.watch.is_active()
    }

    /// Waits for the store to process the offer and returns its token.
    pub async fn token(&mut self) -> Result<String, OfferError> {
        let settled: ShareOffer = self.watch.settled().await?;
        match (settled.status, settled.token) {
            (RecordStatus::Success, Some(token)) => {
                info!(offer = %settled.id, "share token issued");
                Ok(token)
            }
            (RecordStatus::Success, None) => Err(OfferError::Malformed(
                "offer resolved without a token".into(),
            )),
            _ => Err(OfferError::from_status(
                settled.status_code,
                settled.status_message.unwrap_or_default(),
            )),
        }
    }

    /// Stops watching the offer.
    pub fn cancel(&mut self) {
        self.watch.cancel();
    }
}
