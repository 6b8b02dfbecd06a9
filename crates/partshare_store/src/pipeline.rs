//! Processing pipeline for management records.
//!
//! Every offer or response written to a management partition is queued
//! here. The pipeline resolves records one at a time, in write order, and
//! rewrites each one with a terminal status so subscribers observe the
//! outcome.

use crate::auth::TokenPurpose;
use crate::error::{StoreError, StoreResult};
use crate::server::StoreState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use partshare_protocol::{
    ObjectId, ObjectKind, PartitionUrl, Permissions, ShareOffer, ShareResponse, StatusCode,
    TypedRecord,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A management record waiting to be processed.
#[derive(Debug, Clone)]
pub(crate) struct Job {
    pub partition: PartitionUrl,
    pub object_id: ObjectId,
    pub identity: String,
}

type Outcome<T> = Result<T, (StatusCode, String)>;

/// An offer the store issued a token for.
#[derive(Debug, Clone)]
struct OfferGrant {
    partition: PartitionUrl,
    permissions: Permissions,
    expires_at: Option<DateTime<Utc>>,
    redeemed_by: Option<String>,
}

/// Issued offers keyed by offer id.
#[derive(Default)]
pub(crate) struct ShareLedger {
    grants: Mutex<HashMap<ObjectId, OfferGrant>>,
}

impl ShareLedger {
    pub fn len(&self) -> usize {
        self.grants.lock().len()
    }
}

/// Runs the pipeline until the job queue closes.
pub(crate) async fn run(state: Arc<StoreState>, mut jobs: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = jobs.recv().await {
        let delay = state.config.processing_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = process(&state, &job) {
            warn!(object = %job.object_id, partition = %job.partition, error = %e, "management record not processed");
        }
    }
    debug!("share pipeline stopped");
}

/// Resolves one queued record.
pub(crate) fn process(state: &StoreState, job: &Job) -> StoreResult<()> {
    let object = state
        .partitions
        .get(&job.partition, &job.object_id)?
        .ok_or_else(|| StoreError::Internal(format!("queued record {} vanished", job.object_id)))?;

    match object.kind {
        ObjectKind::ShareOffer => {
            let mut offer: ShareOffer = object.decode()?;
            if offer.status.is_terminal() {
                return Ok(());
            }
            match evaluate_offer(state, &job.identity, &offer) {
                Ok(token) => {
                    info!(offer = %offer.id, partition = %offer.partition_url, "share offer accepted");
                    offer.resolve_success(token);
                }
                Err((code, message)) => {
                    info!(offer = %offer.id, %code, %message, "share offer refused");
                    offer.resolve_error(code, message);
                }
            }
            state.partitions.put(&job.partition, offer.to_object()?)
        }
        ObjectKind::ShareResponse => {
            let mut response: ShareResponse = object.decode()?;
            if response.status.is_terminal() {
                return Ok(());
            }
            match evaluate_response(state, &job.identity, &response) {
                Ok(url) => {
                    info!(response = %response.id, partition = %url, "share token redeemed");
                    response.resolve_success(url);
                }
                Err((code, message)) => {
                    info!(response = %response.id, %code, %message, "share response refused");
                    response.resolve_error(code, message);
                }
            }
            state.partitions.put(&job.partition, response.to_object()?)
        }
        ObjectKind::Dog => Err(StoreError::InvalidRequest(
            "only share records are processed".into(),
        )),
    }
}

fn evaluate_offer(state: &StoreState, identity: &str, offer: &ShareOffer) -> Outcome<String> {
    let url = PartitionUrl::parse(offer.partition_url.as_str())
        .map_err(|e| (StatusCode::Malformed, e.to_string()))?;
    if offer.permissions.is_empty() {
        return Err((StatusCode::Malformed, "offer grants no rights".into()));
    }
    if url.root() != state.config.host.root {
        return Err((
            StatusCode::Rejected,
            format!("{url} belongs to another store"),
        ));
    }
    if url.is_management() {
        return Err((
            StatusCode::Rejected,
            "management partitions cannot be shared".into(),
        ));
    }

    let held = state
        .partitions
        .permissions(&url, identity)
        .map_err(|_| (StatusCode::Rejected, format!("unknown partition {url}")))?;
    if !held.may_manage {
        return Err((
            StatusCode::Rejected,
            format!("{identity} may not share {url}"),
        ));
    }
    if offer.is_expired_at(Utc::now()) {
        return Err((StatusCode::Rejected, "offer expired before processing".into()));
    }

    let token = state
        .signer
        .create_token(TokenPurpose::Share, *offer.id.as_bytes())
        .map_err(|e| (StatusCode::Rejected, e.to_string()))?;

    state.ledger.grants.lock().insert(
        offer.id,
        OfferGrant {
            partition: url,
            permissions: offer.permissions,
            expires_at: offer.expires_at,
            redeemed_by: None,
        },
    );
    Ok(token)
}

fn evaluate_response(
    state: &StoreState,
    identity: &str,
    response: &ShareResponse,
) -> Outcome<PartitionUrl> {
    let subject = state
        .signer
        .validate_token(&response.token, TokenPurpose::Share, None)
        .map_err(|e| (StatusCode::InvalidToken, share_token_problem(e)))?;
    let offer_id = ObjectId::from_bytes(subject);

    let mut grants = state.ledger.grants.lock();
    let grant = grants
        .get_mut(&offer_id)
        .ok_or_else(|| (StatusCode::InvalidToken, String::from("no offer issued this token")))?;

    if let Some(redeemer) = &grant.redeemed_by {
        return Err((
            StatusCode::AlreadyConsumed,
            format!("token already redeemed by {redeemer}"),
        ));
    }
    if grant.expires_at.is_some_and(|at| at <= Utc::now()) {
        return Err((StatusCode::Expired, "offer has expired".into()));
    }

    state
        .partitions
        .grant(&grant.partition, identity, grant.permissions)
        .map_err(|e| (StatusCode::PermissionDenied, e.to_string()))?;
    grant.redeemed_by = Some(identity.to_string());

    Ok(grant.partition.clone())
}

fn share_token_problem(error: StoreError) -> String {
    match error {
        StoreError::NotAuthenticated(reason) => format!("share token rejected: {reason}"),
        other => other.to_string(),
    }
}
